use anyhow::Result;
use lib_relay::SourceKind;
use servers::relay_logic::relay;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    relay::launch(SourceKind::Radar, "server_radar").await
}
