//! Serves a directory over WebDAV below `/dav`.
//!
//! ```text
//! cargo run -p loom-dav --example dav_server -- /tmp/share
//! curl -T notes.txt http://127.0.0.1:8080/dav/notes.txt
//! curl -X PROPFIND -H 'Depth: 1' http://127.0.0.1:8080/dav/
//! ```

use std::sync::Arc;

use loom_dav::{DavConfig, DavHandler, FsResourceAdapter, PlainListing};
use loom_http::server::Server;
use loom_web::{NotFoundHandler, PathPattern, Router};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::DEBUG).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let root = std::env::args().nth(1).unwrap_or_else(|| ".".to_owned());
    let adapter = Arc::new(FsResourceAdapter::new(&root));
    let dav = DavHandler::new(adapter, DavConfig::default().with_listing(PlainListing));
    let router = Router::builder().route(PathPattern::prefix("/dav"), dav).not_found(NotFoundHandler).build();

    let server = Server::builder().address("127.0.0.1:8080".parse()?).handler(router).build()?.start().await?;
    info!(root, address = %server.local_addr(), "serving webdav");

    tokio::signal::ctrl_c().await?;
    let forced = server.shutdown().await;
    info!(forced, "stopped");
    Ok(())
}
