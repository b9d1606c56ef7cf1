use std::sync::Arc;

use palaver::{events::Unattended, internal, logging, Options, Server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let options = Options::default();
    logging::init(options.debug);

    let socket = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:2525".to_string())
        .parse()?;

    let server = Server::new(options, Arc::new(Unattended));

    let listener = {
        let server = server.clone();
        tokio::spawn(async move { server.listen(socket).await })
    };

    tokio::signal::ctrl_c().await?;
    internal!(level = INFO, "CTRL+C received, shutting down ...");
    server.close();

    listener.await??;

    Ok(())
}
