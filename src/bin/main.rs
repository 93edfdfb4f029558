//! Binary entrypoint for the taskchat tool

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    taskchat::cli::run().await
}
