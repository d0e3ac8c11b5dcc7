//! Result delivery scenarios: fan-in, registry misses, acknowledgements.

#[cfg(test)]
mod tests {
  use std::{sync::Arc, time::Duration};

  use gateway_core::{ClientId, QueryId};
  use ipc::{FramedConnection, MAX_FRAME_LEN, RESULT_ACK};
  use pretty_assertions::assert_eq;
  use tokio::{io::DuplexStream, task::JoinHandle};
  use tokio_util::sync::CancellationToken;

  use crate::{
    __tests__::helpers::{WAIT, tables},
    broker::{Broker, MemoryBroker, MessageError, QueueMessage, headers},
    output::{ClientHandle, ClientRegistry, Delivery, ResultConsumer},
  };

  fn consumer(results: &[(&str, u32)]) -> (ResultConsumer<DuplexStream>, Arc<ClientRegistry<DuplexStream>>) {
    let (_, multiplicity) = tables(&[], results);
    let registry = Arc::new(ClientRegistry::new());
    let consumer = ResultConsumer::new(Arc::clone(&registry), multiplicity, Duration::from_millis(200));
    (consumer, registry)
  }

  /// Register a client whose peer acknowledges every frame and records it.
  /// The task ends when the connection closes.
  async fn acking_client(registry: &ClientRegistry<DuplexStream>, id: &str) -> JoinHandle<Vec<String>> {
    let (server, client) = tokio::io::duplex(16 * 1024);
    registry
      .register(ClientId::from(id), ClientHandle::new(FramedConnection::new(server)))
      .await;

    tokio::spawn(async move {
      let mut conn = FramedConnection::new(client);
      let mut frames = Vec::new();
      while let Ok(frame) = conn.read().await {
        frames.push(frame);
        if conn.write(RESULT_ACK).await.is_err() {
          break;
        }
      }
      frames
    })
  }

  fn rows(query: &str, client: &str, body: &'static str) -> QueueMessage {
    QueueMessage::result(&QueryId::from(query), &ClientId::from(client), body)
  }

  fn eof(query: &str, client: &str) -> QueueMessage {
    QueueMessage::result_end_of_stream(&QueryId::from(query), &ClientId::from(client))
  }

  // ==========================================================================
  // Fan-in
  // ==========================================================================

  #[tokio::test]
  async fn test_terminal_marker_forwarded_once_after_all_signals() {
    let (consumer, registry) = consumer(&[("Q", 3)]);
    let client = acking_client(&registry, "c1").await;

    let script = [
      (rows("Q", "c1", "1,A"), Delivery::Delivered),
      (eof("Q", "c1"), Delivery::Awaiting { remaining: 2 }),
      (rows("Q", "c1", "2,B"), Delivery::Delivered),
      (eof("Q", "c1"), Delivery::Awaiting { remaining: 1 }),
      (rows("Q", "c1", "3,C"), Delivery::Delivered),
      (eof("Q", "c1"), Delivery::Delivered),
    ];
    for (message, expected) in &script {
      assert_eq!(&consumer.process(message).await, expected);
    }

    registry.close_all().await;
    let frames = tokio::time::timeout(WAIT, client).await.unwrap().unwrap();
    assert_eq!(frames, vec!["Q\n1,A", "Q\n2,B", "Q\n3,C", "Q\nEOF"]);
    assert_eq!(consumer.countdown().len().await, 0);
  }

  #[tokio::test]
  async fn test_fan_in_is_per_client_and_query() {
    let (consumer, registry) = consumer(&[("q1", 2), ("q2", 2)]);
    let a = acking_client(&registry, "a").await;
    let b = acking_client(&registry, "b").await;

    // interleaved signals from two replicas for two clients and two queries
    for message in [eof("q1", "a"), eof("q1", "b"), eof("q2", "a"), eof("q1", "a"), eof("q2", "a")] {
      consumer.process(&message).await;
    }

    registry.close_all().await;
    assert_eq!(a.await.unwrap(), vec!["q1\nEOF", "q2\nEOF"]);
    assert!(b.await.unwrap().is_empty(), "b saw only one of two signals");
    assert_eq!(consumer.countdown().remaining(&"b".into(), &"q1".into()).await, Some(1));
  }

  #[tokio::test]
  async fn test_unconfigured_query_forwards_first_signal() {
    let (consumer, registry) = consumer(&[]);
    let client = acking_client(&registry, "c").await;

    assert_eq!(consumer.process(&eof("other", "c")).await, Delivery::Delivered);

    registry.close_all().await;
    assert_eq!(client.await.unwrap(), vec!["other\nEOF"]);
  }

  // ==========================================================================
  // Misses & failures
  // ==========================================================================

  #[tokio::test]
  async fn test_unknown_client_is_dropped_and_processing_continues() {
    let (consumer, registry) = consumer(&[]);
    let client = acking_client(&registry, "here").await;

    assert_eq!(consumer.process(&rows("q", "gone", "1,A")).await, Delivery::NoClient);
    assert_eq!(consumer.process(&rows("q", "here", "2,B")).await, Delivery::Delivered);

    registry.close_all().await;
    assert_eq!(client.await.unwrap(), vec!["q\n2,B"]);
  }

  #[tokio::test]
  async fn test_message_without_client_header_is_malformed() {
    let (consumer, _registry) = consumer(&[]);
    let message = QueueMessage::new("1,A").with_header(headers::QUERY, "q");

    assert_eq!(
      consumer.process(&message).await,
      Delivery::Malformed(MessageError::MissingHeader(headers::CLIENT_ID))
    );
  }

  #[tokio::test]
  async fn test_wrong_ack_is_reported_and_next_message_delivered() {
    let (consumer, registry) = consumer(&[]);
    let (server, client) = tokio::io::duplex(1024);
    registry
      .register("c".into(), ClientHandle::new(FramedConnection::new(server)))
      .await;

    let peer = tokio::spawn(async move {
      let mut conn = FramedConnection::new(client);
      conn.read().await.unwrap();
      conn.write("NOPE").await.unwrap();
      conn.read().await.unwrap();
      conn.write(RESULT_ACK).await.unwrap();
      conn
    });

    assert_eq!(
      consumer.process(&rows("q", "c", "1")).await,
      Delivery::AckMismatch("NOPE".to_string())
    );
    assert_eq!(consumer.process(&rows("q", "c", "2")).await, Delivery::Delivered);
    drop(peer.await.unwrap());
  }

  #[tokio::test]
  async fn test_silent_client_times_out_without_blocking_consumer() {
    let (consumer, registry) = consumer(&[]);
    let (server, _client) = tokio::io::duplex(1024);
    registry
      .register("c".into(), ClientHandle::new(FramedConnection::new(server)))
      .await;

    let outcome = tokio::time::timeout(WAIT, consumer.process(&rows("q", "c", "1")))
      .await
      .unwrap();
    assert_eq!(outcome, Delivery::AckTimedOut);
    assert!(registry.get(&"c".into()).await.is_some());
  }

  #[tokio::test]
  async fn test_lost_connection_removes_client() {
    let (consumer, registry) = consumer(&[]);
    let (server, client) = tokio::io::duplex(1024);
    registry
      .register("c".into(), ClientHandle::new(FramedConnection::new(server)))
      .await;
    drop(client);

    assert_eq!(consumer.process(&rows("q", "c", "1")).await, Delivery::Disconnected);
    assert!(registry.get(&"c".into()).await.is_none());
    assert_eq!(consumer.process(&rows("q", "c", "2")).await, Delivery::NoClient);
  }

  #[tokio::test]
  async fn test_oversized_result_is_dropped_but_client_kept() {
    let (consumer, registry) = consumer(&[("q", 1)]);
    let client = acking_client(&registry, "c1").await;

    // with the "q\n" prefix the frame exceeds the length field
    let oversized = QueueMessage::result(&QueryId::from("q"), &ClientId::from("c1"), "x".repeat(MAX_FRAME_LEN));
    assert!(matches!(consumer.process(&oversized).await, Delivery::Undeliverable(_)));
    assert!(registry.get(&"c1".into()).await.is_some());

    assert_eq!(consumer.process(&eof("q", "c1")).await, Delivery::Delivered);
    registry.close_all().await;
    assert_eq!(client.await.unwrap(), vec!["q\nEOF"]);
  }

  #[tokio::test]
  async fn test_ack_that_never_arrives_drops_client() {
    let (consumer, registry) = consumer(&[]);
    let (server, client) = tokio::io::duplex(1024);
    registry
      .register("c".into(), ClientHandle::new(FramedConnection::new(server)))
      .await;

    let peer = tokio::spawn(async move {
      let mut conn = FramedConnection::new(client);
      let first = conn.read().await.unwrap();
      // no ack; the next thing seen is the close
      let after = conn.read().await;
      (first, after.is_err())
    });

    assert_eq!(consumer.process(&rows("q", "c", "1")).await, Delivery::AckTimedOut);
    assert_eq!(consumer.process(&rows("q", "c", "2")).await, Delivery::Desynchronised);
    assert!(registry.get(&"c".into()).await.is_none());

    let (first, closed) = tokio::time::timeout(WAIT, peer).await.unwrap().unwrap();
    assert_eq!(first, "q\n1");
    assert!(closed);
  }

  // ==========================================================================
  // Consumption loop
  // ==========================================================================

  #[tokio::test]
  async fn test_run_drains_queue_in_order_and_stops_on_cancel() {
    let (consumer, registry) = consumer(&[("q", 2)]);
    let client = acking_client(&registry, "c").await;

    let broker = MemoryBroker::new(16);
    broker.declare("results").await.unwrap();
    for message in [rows("q", "c", "1"), eof("q", "c"), rows("q", "c", "2"), eof("q", "c")] {
      broker.publish("results", message).await.unwrap();
    }

    let subscription = broker.consume("results").await.unwrap();
    let consumer = Arc::new(consumer);
    let cancel = CancellationToken::new();
    let task = {
      let consumer = Arc::clone(&consumer);
      let cancel = cancel.clone();
      tokio::spawn(async move { consumer.run(subscription, cancel).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();
    let processed = tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
    assert_eq!(processed, 4);

    registry.close_all().await;
    assert_eq!(client.await.unwrap(), vec!["q\n1", "q\n2", "q\nEOF"]);
  }
}
