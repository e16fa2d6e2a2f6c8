use std::time::Duration;
use pgshake::{Connection, Result};


/// Wait for `NOTIFY` from other sessions for a while.
///
/// Nothing issues `LISTEN` here, so only notices and parameter changes are expected.
pub async fn main() -> Result<()> {
    let mut conn = Connection::connect_env().await?;

    conn.notifications().subscribe(|n| async move {
        tracing::info!("notification from {}: {} {}", n.process_id, n.channel, n.payload);
        Ok(())
    });
    conn.notices().subscribe(|notice| async move {
        tracing::info!("notice: {notice}");
        Ok(())
    });

    let result = match conn.tick(Duration::from_secs(1)).await {
        Err(err) if err.is_timeout() => Ok(()),
        result => result,
    };

    if let Some(key) = conn.cancel_key() {
        key.cancel_with(conn.config()).await?;
    }

    conn.terminated(result).await
}
