use newsletter_dispatch::config::get_configuration;
use newsletter_dispatch::startup::Application;
use newsletter_dispatch::telemetry::{get_subscriber, init_subscriber};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let subscriber = get_subscriber(
        String::from("newsletter_dispatch"),
        String::from("info"),
        std::io::stdout,
    );

    init_subscriber(subscriber).expect("Failed to install the tracing subscriber.");

    let config = get_configuration().expect("Missing configuration file.");
    let application = Application::build(config).await?;

    tracing::info!("Server listening on port {}", application.get_port());

    application.run_until_stop().await
}
