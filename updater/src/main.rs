use clap::{CommandFactory, Parser};
use downloader::CancellationToken;
use updater::cli::Args;
use updater::orchestrator::{self, Updater};
use updater::presenter::{default_log_level, LogObserver, TerminalObserver};

#[tokio::main]
async fn main() {
    if std::env::args_os().len() <= 1 {
        let _ = Args::command().print_long_help();
        return;
    }
    let args = Args::parse();
    let request = match args.resolve().await {
        Ok(request) => request,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };
    let default_level = default_log_level(&request);
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let updater = Updater::new(request);
    let cancel = CancellationToken::new();

    let result = if updater.request().headless {
        updater.run(&mut LogObserver::new(), cancel).await
    } else {
        let ctrl_c = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    log::info!("Ctrl-C received, cancelling the update");
                    cancel.cancel();
                }
            }
        });
        let request = updater.request();
        let mut terminal = TerminalObserver::new(&request.software_name, &request.current_version);
        let result = updater.run(&mut terminal, cancel).await;
        ctrl_c.abort();
        result
    };
    std::process::exit(orchestrator::conclude(result));
}
