//! `mcpe ping` and `mcpe stop`.

use crate::client::Client;
use anyhow::{anyhow, bail, Result};
use mcpe_core::{Event, LineTransport, Request};
use std::time::Duration;

const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Ask the supervisor for its version.
pub async fn ping<T: LineTransport>(client: &mut Client<T>) -> Result<String> {
    client.send(&Request::Ping).await?;
    let version = tokio::time::timeout(PING_TIMEOUT, wait_pong(client))
        .await
        .map_err(|_| anyhow!("no pong within {}s", PING_TIMEOUT.as_secs()))??;
    client.close().await?;
    Ok(version)
}

async fn wait_pong<T: LineTransport>(client: &mut Client<T>) -> Result<String> {
    loop {
        match client.next_event().await? {
            Some(Event::Pong { version }) => return Ok(version),
            Some(Event::Error { message, .. }) => bail!("ping failed: {message}"),
            Some(_) => continue,
            None => bail!("server closed the connection"),
        }
    }
}

/// Ask the supervisor to stop the server and exit.
pub async fn stop<T: LineTransport>(client: &mut Client<T>) -> Result<()> {
    client.send(&Request::Stop).await?;
    client.close().await
}
