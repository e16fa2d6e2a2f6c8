use std::env::var;
use pgshake::{Config, Connection, Result, Socket, Startup};


pub async fn main() -> Result<()> {

    if let Ok(url) = var("DATABASE_URL") {
        let conn = Connection::connect(&url).await?;
        tracing::info!("connected with url, backend {:?}", conn.process_id());
        conn.close().await?;
    }

    let conn = Connection::connect_env().await?;
    for (name, value) in conn.runtime_params() {
        tracing::info!("{name} = {value}");
    }
    conn.close().await?;

    // step by step, observing the handshake
    let config = Config::from_env();
    let io = Socket::connect(&config).await?;
    let mut startup = Startup::new(config, io);

    startup.parameter_statuses().subscribe(|status| {
        tracing::debug!("startup parameter {}: {}", status.name, status.value);
        futures::future::ok(())
    });

    let authenticating = startup.secure().await?.send_startup().await?;
    let conn = authenticating.authenticate().await?.ready().await?;
    tracing::info!("ready: {:?}", conn.transaction_status());
    conn.close().await?;

    Ok(())
}
