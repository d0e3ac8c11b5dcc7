//! Client id assignment.
//!
//! A producer that has no identity yet connects here, receives a fresh id
//! as a single frame, and the connection is closed.

use gateway_core::ClientId;
use ipc::{FramedConnection, WireError};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::info;
use uuid::Uuid;

pub fn new_client_id() -> ClientId {
  ClientId::new(Uuid::new_v4().to_string())
}

pub async fn assign_client_id<T>(io: T) -> Result<ClientId, WireError>
where
  T: AsyncRead + AsyncWrite + Unpin,
{
  let mut conn = FramedConnection::new(io);
  let client_id = new_client_id();

  conn.write(client_id.as_str()).await?;
  conn.shutdown().await?;

  info!(client_id = %client_id, "Assigned client id");
  Ok(client_id)
}
