//! Ingestion router scenarios over an in-memory pipe.

#[cfg(test)]
mod tests {
  use std::{sync::Arc, time::Duration};

  use gateway_core::EntityKind;
  use ipc::FramedConnection;
  use pretty_assertions::assert_eq;

  use crate::{
    __tests__::helpers::{FlakyBroker, WAIT, declared_broker, drain, router, spawn_session, tables},
    broker::{Broker, MemoryBroker, QueueMessage, headers},
    input::{FanOutReport, Router, RouterSettings},
  };

  const MOVIE: &str = "10|Nueve reinas|Two con men|1000|2000|Crime|Argentina|2000-08-31";

  fn header_of<'a>(message: &'a QueueMessage, key: &str) -> Option<&'a str> {
    message.header(key)
  }

  // ==========================================================================
  // Acknowledgements & fan-out
  // ==========================================================================

  #[tokio::test]
  async fn test_two_batches_then_end_of_stream_fans_out_three() {
    let (routing, multiplicity) = tables(&[("Q", EntityKind::Movies, "filter_q", 3)], &[]);
    let broker = declared_broker(&routing, &[]).await;
    let router = router(routing, multiplicity, broker.clone());
    let (io, session, _cancel) = spawn_session(router, EntityKind::Movies);
    let mut producer = FramedConnection::new(io);

    producer.write(&format!("Q,MOVIES,client-1,0\n{}", MOVIE)).await.unwrap();
    assert_eq!(producer.read().await.unwrap(), "MOVIES_ACK:0");
    producer.write(&format!("Q,MOVIES,client-1,1\n{}", MOVIE)).await.unwrap();
    assert_eq!(producer.read().await.unwrap(), "MOVIES_ACK:1");
    producer.write("Q,MOVIES,client-1,EOF").await.unwrap();
    assert_eq!(producer.read().await.unwrap(), "MOVIES_EOF_ACK");

    drop(producer);
    let summary = tokio::time::timeout(WAIT, session).await.unwrap().unwrap();
    assert_eq!(summary.batches, 2);
    assert_eq!(summary.end_of_streams, 1);
    assert_eq!(
      summary.fan_out,
      vec![FanOutReport {
        query: "Q".into(),
        queue: "filter_q".to_string(),
        expected: 3,
        published: 3,
      }]
    );

    let messages = drain(&broker, "filter_q").await;
    assert_eq!(messages.len(), 5);

    let batches: Vec<_> = messages.iter().filter(|m| !m.body.is_empty()).collect();
    assert_eq!(batches.len(), 2);
    assert_eq!(header_of(batches[0], headers::BATCH_ID), Some("0"));
    assert_eq!(header_of(batches[1], headers::BATCH_ID), Some("1"));
    assert_eq!(header_of(batches[0], headers::TYPE), Some("MOVIES"));

    let terminations: Vec<_> = messages[2..].iter().collect();
    assert_eq!(terminations.len(), 3);
    for message in terminations {
      assert_eq!(header_of(message, headers::QUERY), Some("Q"));
      assert_eq!(header_of(message, headers::CLIENT_ID), Some("client-1"));
      assert_eq!(header_of(message, headers::TYPE), Some("EOF"));
      assert!(message.body.is_empty());
    }
  }

  #[tokio::test]
  async fn test_primary_batch_feeds_every_routed_query() {
    let (routing, multiplicity) = tables(
      &[
        ("q1", EntityKind::Movies, "filter_q1", 1),
        ("q2", EntityKind::Movies, "filter_q2", 1),
      ],
      &[],
    );
    let broker = declared_broker(&routing, &[]).await;
    let router = router(routing, multiplicity, broker.clone());
    let (io, _session, _cancel) = spawn_session(router, EntityKind::Movies);
    let mut producer = FramedConnection::new(io);

    producer
      .write(&format!("q1|q2|unknown,MOVIES,c,4\n{}", MOVIE))
      .await
      .unwrap();
    assert_eq!(producer.read().await.unwrap(), "MOVIES_ACK:4");

    for queue in ["filter_q1", "filter_q2"] {
      let messages = drain(&broker, queue).await;
      assert_eq!(messages.len(), 1, "queue {}", queue);
      let body = messages[0].body_text().unwrap();
      assert!(body.starts_with("id,title,overview"));
      assert!(body.ends_with("10,Nueve reinas,Two con men,1000,2000,Crime,Argentina,2000-08-31"));
    }
  }

  #[tokio::test]
  async fn test_secondary_end_of_stream_uses_entity_tag() {
    let (routing, multiplicity) = tables(&[("q4", EntityKind::Credits, "join_q4", 2)], &[]);
    let broker = declared_broker(&routing, &[]).await;
    let router = router(routing, multiplicity, broker.clone());
    let (io, session, _cancel) = spawn_session(router, EntityKind::Credits);
    let mut producer = FramedConnection::new(io);

    producer.write("q4,CREDITS,c,EOF").await.unwrap();
    assert_eq!(producer.read().await.unwrap(), "CREDITS_EOF_ACK");
    drop(producer);
    tokio::time::timeout(WAIT, session).await.unwrap().unwrap();

    let messages = drain(&broker, "join_q4").await;
    assert_eq!(messages.len(), 2);
    assert!(messages.iter().all(|m| m.header(headers::TYPE) == Some("EOF_CREDITS")));
  }

  #[tokio::test]
  async fn test_unrouted_end_of_stream_is_acknowledged_without_fan_out() {
    let (routing, multiplicity) = tables(&[("q1", EntityKind::Movies, "filter_q1", 2)], &[]);
    let broker = declared_broker(&routing, &[]).await;
    let router = router(routing, multiplicity, broker.clone());
    let (io, session, _cancel) = spawn_session(router, EntityKind::Ratings);
    let mut producer = FramedConnection::new(io);

    producer.write("q1,RATINGS,c,EOF").await.unwrap();
    assert_eq!(producer.read().await.unwrap(), "RATINGS_EOF_ACK");

    drop(producer);
    let summary = tokio::time::timeout(WAIT, session).await.unwrap().unwrap();
    assert_eq!(summary.end_of_streams, 1);
    assert!(summary.fan_out.is_empty());
    assert_eq!(broker.pending("filter_q1").await, Some(0));
  }

  // ==========================================================================
  // Malformed frames & ordering
  // ==========================================================================

  #[tokio::test]
  async fn test_malformed_header_is_skipped_without_ack() {
    let (routing, multiplicity) = tables(&[("q", EntityKind::Ratings, "join_q", 1)], &[]);
    let broker = declared_broker(&routing, &[]).await;
    let router = router(routing, multiplicity, broker.clone());
    let (io, session, _cancel) = spawn_session(router, EntityKind::Ratings);
    let mut producer = FramedConnection::new(io);

    producer.write("garbage").await.unwrap();
    producer.write("q,RATINGS,c,notanumber").await.unwrap();
    producer.write("q,RATINGS,c,0\n1|31|2.5|1260759144").await.unwrap();

    // the first reply belongs to the valid frame
    assert_eq!(producer.read().await.unwrap(), "RATINGS_ACK:0");

    drop(producer);
    let summary = tokio::time::timeout(WAIT, session).await.unwrap().unwrap();
    assert_eq!(summary.malformed, 2);
    assert_eq!(summary.batches, 1);
    assert_eq!(summary.end_of_streams, 0);

    let messages = drain(&broker, "join_q").await;
    assert_eq!(messages[0].body_text().unwrap(), "movie_id,rating\n31,2.5");
  }

  #[tokio::test]
  async fn test_ack_waits_for_publish_to_complete() {
    let (routing, multiplicity) = tables(&[("q", EntityKind::Movies, "filter_q", 1)], &[]);
    let broker = Arc::new(MemoryBroker::new(1));
    broker.declare("filter_q").await.unwrap();
    broker.publish("filter_q", QueueMessage::new("occupying")).await.unwrap();

    let router = router(routing, multiplicity, broker.clone());
    let (io, _session, _cancel) = spawn_session(router, EntityKind::Movies);
    let mut producer = FramedConnection::new(io);

    producer.write(&format!("q,MOVIES,c,0\n{}", MOVIE)).await.unwrap();
    let early = tokio::time::timeout(Duration::from_millis(100), producer.read()).await;
    assert!(early.is_err(), "ack must not precede the publish");

    let mut subscription = broker.consume("filter_q").await.unwrap();
    assert_eq!(subscription.next().await.unwrap().body, "occupying");
    assert_eq!(
      tokio::time::timeout(WAIT, producer.read()).await.unwrap().unwrap(),
      "MOVIES_ACK:0"
    );
  }

  #[tokio::test]
  async fn test_failed_batch_publish_still_acknowledges() {
    let (routing, multiplicity) = tables(&[("q", EntityKind::Movies, "filter_q", 1)], &[]);
    let memory = declared_broker(&routing, &[]).await;
    let flaky = Arc::new(FlakyBroker::new(memory.clone()));
    flaky.fail_after(0, 1);

    let router = router(routing, multiplicity, flaky);
    let (io, session, _cancel) = spawn_session(router, EntityKind::Movies);
    let mut producer = FramedConnection::new(io);

    producer.write(&format!("q,MOVIES,c,0\n{}", MOVIE)).await.unwrap();
    assert_eq!(producer.read().await.unwrap(), "MOVIES_ACK:0");
    producer.write(&format!("q,MOVIES,c,1\n{}", MOVIE)).await.unwrap();
    assert_eq!(producer.read().await.unwrap(), "MOVIES_ACK:1");

    drop(producer);
    let summary = tokio::time::timeout(WAIT, session).await.unwrap().unwrap();
    assert_eq!((summary.batches, summary.skipped), (2, 1));

    let messages = drain(&memory, "filter_q").await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].header(headers::BATCH_ID), Some("1"));
  }

  // ==========================================================================
  // Fan-out compensation
  // ==========================================================================

  #[tokio::test]
  async fn test_transient_fan_out_failures_are_retried() {
    let (routing, multiplicity) = tables(&[("q", EntityKind::Movies, "filter_q", 3)], &[]);
    let memory = declared_broker(&routing, &[]).await;
    let flaky = Arc::new(FlakyBroker::new(memory.clone()));
    // second termination fails twice, within the retry budget
    flaky.fail_after(1, 2);

    let router = router(routing, multiplicity, flaky);
    let (io, session, _cancel) = spawn_session(router, EntityKind::Movies);
    let mut producer = FramedConnection::new(io);

    producer.write("q,MOVIES,c,EOF").await.unwrap();
    assert_eq!(producer.read().await.unwrap(), "MOVIES_EOF_ACK");

    drop(producer);
    let summary = tokio::time::timeout(WAIT, session).await.unwrap().unwrap();
    assert!(summary.fan_out[0].is_complete());
    assert_eq!(drain(&memory, "filter_q").await.len(), 3);
  }

  #[tokio::test]
  async fn test_persistent_fan_out_failure_abandons_remaining_publishes() {
    let (routing, multiplicity) = tables(
      &[
        ("q1", EntityKind::Movies, "filter_q1", 3),
        ("q2", EntityKind::Movies, "filter_q2", 2),
      ],
      &[],
    );
    let memory = declared_broker(&routing, &[]).await;
    let flaky = Arc::new(FlakyBroker::new(memory.clone()));
    // one success, then three failures exhaust the retries for q1
    flaky.fail_after(1, 3);

    let router = router(routing, multiplicity, flaky);
    let (io, session, _cancel) = spawn_session(router, EntityKind::Movies);
    let mut producer = FramedConnection::new(io);

    producer.write("q1|q2,MOVIES,c,EOF").await.unwrap();
    assert_eq!(producer.read().await.unwrap(), "MOVIES_EOF_ACK");

    drop(producer);
    let summary = tokio::time::timeout(WAIT, session).await.unwrap().unwrap();
    let reports = summary.fan_out;
    assert_eq!(reports.len(), 2);
    assert_eq!((reports[0].expected, reports[0].published), (3, 1));
    assert!(!reports[0].is_complete());
    assert!(reports[1].is_complete());

    assert_eq!(drain(&memory, "filter_q1").await.len(), 1);
    assert_eq!(drain(&memory, "filter_q2").await.len(), 2);
  }

  #[tokio::test]
  async fn test_one_connection_carries_a_notice_per_query() {
    let (routing, multiplicity) = tables(
      &[
        ("q1", EntityKind::Movies, "filter_q1", 2),
        ("q2", EntityKind::Movies, "filter_q2", 2),
      ],
      &[],
    );
    let broker = declared_broker(&routing, &[]).await;
    let router = router(routing, multiplicity, broker.clone());
    let (io, session, _cancel) = spawn_session(router, EntityKind::Movies);
    let mut producer = FramedConnection::new(io);

    producer.write(&format!("q1|q2,MOVIES,c,0\n{}", MOVIE)).await.unwrap();
    assert_eq!(producer.read().await.unwrap(), "MOVIES_ACK:0");
    producer.write("q1,MOVIES,c,EOF").await.unwrap();
    assert_eq!(producer.read().await.unwrap(), "MOVIES_EOF_ACK");
    producer.write("q2,MOVIES,c,EOF").await.unwrap();
    assert_eq!(producer.read().await.unwrap(), "MOVIES_EOF_ACK");

    drop(producer);
    let summary = tokio::time::timeout(WAIT, session).await.unwrap().unwrap();
    assert_eq!(summary.end_of_streams, 2);
    let queues: Vec<_> = summary.fan_out.iter().map(|r| (r.queue.as_str(), r.published)).collect();
    assert_eq!(queues, vec![("filter_q1", 2), ("filter_q2", 2)]);

    // one batch plus two terminations on each queue
    assert_eq!(drain(&broker, "filter_q1").await.len(), 3);
    assert_eq!(drain(&broker, "filter_q2").await.len(), 3);
  }

  // ==========================================================================
  // Session lifetime
  // ==========================================================================

  #[tokio::test]
  async fn test_idle_producer_is_disconnected() {
    let (routing, multiplicity) = tables(&[("q", EntityKind::Movies, "filter_q", 1)], &[]);
    let broker = declared_broker(&routing, &[]).await;
    let settings = RouterSettings {
      read_timeout: Duration::from_millis(50),
      fan_out_retries: 0,
    };
    let router = Arc::new(Router::new(routing, multiplicity, broker, settings));
    let (io, session, _cancel) = spawn_session(router, EntityKind::Movies);
    let mut producer = FramedConnection::new(io);

    let summary = tokio::time::timeout(WAIT, session).await.unwrap().unwrap();
    assert_eq!(summary.batches, 0);
    assert!(producer.read().await.unwrap_err().is_end_of_stream());
  }

  #[tokio::test]
  async fn test_cancel_ends_session() {
    let (routing, multiplicity) = tables(&[("q", EntityKind::Movies, "filter_q", 1)], &[]);
    let broker = declared_broker(&routing, &[]).await;
    let router = router(routing, multiplicity, broker);
    let (_io, session, cancel) = spawn_session(router, EntityKind::Movies);

    cancel.cancel();
    let summary = tokio::time::timeout(WAIT, session).await.unwrap().unwrap();
    assert_eq!(summary.client_id, None);
  }
}
