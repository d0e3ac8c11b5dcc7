//! CLI command implementations

mod config;
mod produce;
mod results;
mod serve;

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

pub use config::{cmd_config_init, cmd_config_show};
pub use produce::{ProduceOptions, cmd_produce};
pub use results::cmd_results;
pub use serve::cmd_serve;

/// Turn a listen address into one a local client can dial.
///
/// Wildcard hosts become loopback of the same family; anything else is used as is.
pub(crate) fn dial_address(listen: &str) -> String {
  match listen.parse::<SocketAddr>() {
    Ok(addr) if addr.ip().is_unspecified() => {
      let loopback = match addr.ip() {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
      };
      SocketAddr::new(loopback, addr.port()).to_string()
    }
    _ => listen.to_string(),
  }
}
