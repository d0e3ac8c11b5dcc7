use std::time::Duration;

use gateway_core::ClientId;
use ipc::{Announcement, FramedConnection};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::registry::{ClientHandle, ClientRegistry};

/// Read the announcement on a fresh result connection and register it.
///
/// The connection is closed when nothing valid arrives before `deadline`,
/// or when shutdown began while it was being registered.
pub async fn accept_announcement<T>(
  io: T,
  registry: &ClientRegistry<T>,
  deadline: Duration,
  cancel: &CancellationToken,
) -> Option<ClientId>
where
  T: AsyncRead + AsyncWrite + Unpin + Send,
{
  let mut conn = FramedConnection::new(io);

  let payload = match tokio::time::timeout(deadline, conn.read()).await {
    Ok(Ok(payload)) => payload,
    Ok(Err(e)) => {
      warn!(error = %e, "Result connection closed before announcing");
      return None;
    }
    Err(_) => {
      warn!(timeout_secs = deadline.as_secs(), "No announcement in time, closing");
      let _ = conn.shutdown().await;
      return None;
    }
  };

  let Some(announcement) = Announcement::parse(&payload) else {
    warn!(payload = %payload, "Malformed announcement, closing");
    let _ = conn.shutdown().await;
    return None;
  };

  let client_id = announcement.client_id;
  let handle = ClientHandle::new(conn);
  registry.register(client_id.clone(), handle.clone()).await;

  // close_all may already have run
  if cancel.is_cancelled() {
    info!(client_id = %client_id, "Announced during shutdown, closing");
    registry.remove_if_current(&client_id, &handle).await;
    handle.close().await;
    return None;
  }
  Some(client_id)
}
