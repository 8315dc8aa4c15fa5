//! Демонстрационный хост chanrt.
//!
//! Загружает конфигурацию, поднимает логирование и модули: периодический
//! издатель `MocapData`, подписчик и, если настроен, Lua-скрипт. Работает до
//! Ctrl-C или до истечения `--run-for-secs`.

use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use chanrt::{
    config::Settings,
    logging::init_logging,
    module::{LuaScriptModule, ModuleHost, NormalPublisherModule, NormalSubscriberModule},
};
use clap::Parser;

#[derive(Parser)]
#[command(name = "chanrt")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "chanrt - typed in-process pub/sub demo host", long_about = None)]
struct Cli {
    /// Файл конфигурации (TOML, YAML или JSON по расширению)
    #[arg(long = "cfg-file-path", env = "CHANRT_CFG_FILE_PATH")]
    cfg_file_path: Option<PathBuf>,
    /// Остановиться через указанное число секунд вместо ожидания Ctrl-C
    #[arg(long, help = "Остановить хост через N секунд")]
    run_for_secs: Option<u64>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings =
        Settings::load(cli.cfg_file_path.as_deref()).context("failed to load settings")?;
    let logging = init_logging(&settings.log).context("failed to initialize logging")?;
    let lua_enabled = settings.lua.is_some();

    let mut host = ModuleHost::new(settings)?;
    host.add_module(Box::new(NormalPublisherModule::new("publisher")))?;
    host.add_module(Box::new(NormalSubscriberModule::new("subscriber")))?;
    if lua_enabled {
        host.add_module(Box::new(LuaScriptModule::new("lua")))?;
    }

    host.initialize()?;
    host.start()?;
    tracing::info!(modules = ?host.module_names(), "chanrt running");

    let waited = wait_for_stop(cli.run_for_secs);
    let stopped = host.shutdown();
    logging.shutdown();

    waited?;
    stopped?;
    Ok(())
}

/// Ждёт Ctrl-C или таймаут на отдельном однопоточном рантайме.
fn wait_for_stop(run_for_secs: Option<u64>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build signal runtime")?;

    runtime.block_on(async {
        match run_for_secs {
            Some(secs) => {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                    signal = tokio::signal::ctrl_c() => signal?,
                }
            }
            None => tokio::signal::ctrl_c().await?,
        }
        tracing::info!("stop requested");
        Ok::<(), anyhow::Error>(())
    })
}
