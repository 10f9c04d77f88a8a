use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    twinport::boot::init_common();
    let matches = twinport::cli::parse_args();

    if twinport::cli::actions::run_one_shot_actions(&matches) {
        return Ok(());
    }

    if matches.get_flag("run") {
        let code = twinport::boot::start_headless(&matches).await?;
        std::process::exit(code);
    }

    twinport::boot::start_console(&matches).await
}
