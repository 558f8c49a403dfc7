use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let matches = refarm_bridge::cli::parse_args();
    refarm_bridge::init_logger(matches.get_one::<String>("log-file").map(String::as_str));

    let config = match refarm_bridge::cli::load_config(&matches) {
        Ok(config) => config,
        Err(err) => {
            log::error!("Invalid configuration: {err:#}");
            return ExitCode::FAILURE;
        }
    };

    if matches.get_flag("print-config") {
        return match config.to_toml() {
            Ok(toml) => {
                println!("{toml}");
                ExitCode::SUCCESS
            }
            Err(err) => {
                log::error!("Failed to render configuration: {err:#}");
                ExitCode::FAILURE
            }
        };
    }

    match refarm_bridge::start_bridge(config).await {
        Ok(status) => ExitCode::from(status),
        Err(err) => {
            log::error!("Start-up failed: {err:#}");
            ExitCode::FAILURE
        }
    }
}
