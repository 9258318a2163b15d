use anyhow::Result;
use servers::relay_logic::display;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    display::launch("server_display").await
}
