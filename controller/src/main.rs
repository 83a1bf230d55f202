mod baseline;
mod collab;
mod device;
mod error;
mod history;
mod host;
mod store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
