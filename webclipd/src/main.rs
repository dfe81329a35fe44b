use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = webclipd::Cli::parse();
    if let Err(err) = webclipd::run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
