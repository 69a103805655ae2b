// スマートメーターBルートから瞬時電力と積算電力量を収集する。
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use anyhow::Context;
use clap::Parser;
use serialport::{DataBits, Parity, StopBits};
use std::io;
use std::process::ExitCode;
use std::result;
use std::time::Duration;
use thiserror::Error;
use tracing::{Event, Subscriber};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, FormatEvent, FormatFields, time::LocalTime},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
};
use wisun_broute::scheduler::TimerTable;
use wisun_broute::sensor::JsonLinesSink;
use wisun_broute::skstack::{SerialPortTransport, SystemClock};
use wisun_broute::{BRoute, Settings, Status, broute, config};

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

/// スマートメーターBルートから計測値を収集する。
#[derive(Parser, Debug)]
#[command(name = "broute_daqd")]
#[command(version, about, long_about = None)]
struct Cli {
    /// 設定ファイル名
    #[arg(short = 'C', long, default_value = "broute.toml")]
    config_file: String,

    /// シリアルデバイス名
    #[arg(short = 'D', long, env = "SERIAL_DEVICE")]
    device: Option<String>,
}

#[derive(Debug, Error)]
pub enum DaqDaemonError {
    #[error(r#"i/o "{0}""#)]
    Io(#[from] io::Error),

    #[error(r#"serial port "{0}""#)]
    SerialPort(#[from] serialport::Error),

    #[error(r#"config "{0}""#)]
    Config(#[from] config::Error),

    #[error(r#"setup "{0}""#)]
    Setup(#[from] broute::Error),

    #[error("{0}")]
    Other(&'static str),
}

/// 収集を止めた理由
#[derive(Debug)]
enum Outcome {
    RebootRequested,
    Interrupted,
}

/// スマートメーターから計測値を収集する
async fn exec_data_acquisition(
    port_name: &str,
    settings: &Settings,
) -> result::Result<Outcome, DaqDaemonError> {
    let config = settings.broute_config()?;
    // シリアルポートを開く
    let serial_port = serialport::new(port_name, settings.baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .timeout(Duration::from_millis(10))
        .open()?;
    let transport = SerialPortTransport::new(serial_port);
    let mut broute = BRoute::new(transport, SystemClock::new(), TimerTable::new(), config);
    if settings.power.is_some() {
        broute = broute.with_power_sensor(Box::new(JsonLinesSink::new("power", io::stdout())));
    }
    if settings.energy.is_some() {
        broute = broute.with_energy_sensor(Box::new(JsonLinesSink::new("energy", io::stdout())));
    }
    if !broute.is_measurement_requesting() {
        tracing::warn!("no sensor configured, only connecting");
    }
    broute.setup()?;

    let mut interval = tokio::time::interval(Duration::from_millis(settings.tick_interval_ms.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = interval.tick() => match broute.tick() {
                Status::Running => {}
                Status::RebootRequested => return Ok(Outcome::RebootRequested),
                Status::Failed => return Err(DaqDaemonError::Other("state machine failed")),
            },
            signal = tokio::signal::ctrl_c() => {
                signal?;
                return Ok(Outcome::Interrupted);
            }
        }
    }
}

/// 設定ファイルとシリアルデバイス名
fn load_settings(cli: &Cli) -> anyhow::Result<(String, Settings)> {
    let settings = Settings::load(&cli.config_file)
        .with_context(|| format!(r#"config file "{}""#, cli.config_file))?;
    let device = cli
        .device
        .clone()
        .or_else(|| settings.device.clone())
        .context(r#"Must be set to "--device" or "SERIAL_DEVICE" environment."#)?;
    Ok((device, settings))
}

/// SKSETPWD XX 以降のパスワードをマスクするフォーマッタ
struct MaskingRouteBPasswordFormatter<F> {
    inner: F,
}

/// パスワード部分を#に置き換える
fn mask_route_b_password(buf: &mut String) {
    const PATTERN: &str = "SKSETPWD ";
    let Some(pos) = buf.find(PATTERN) else {
        return;
    };
    // パスワード長(16進2桁)と空白を飛ばす
    let start = pos + PATTERN.len() + 3;
    if start >= buf.len() || !buf.is_char_boundary(start) {
        return;
    }
    let end = buf[start..]
        .find(|c: char| c.is_whitespace() || c == '\\' || c == '"')
        .map_or(buf.len(), |n| start + n);
    let masking_str = "#".repeat(end - start);
    buf.replace_range(start..end, &masking_str);
}

impl<S, N, F> FormatEvent<S, N> for MaskingRouteBPasswordFormatter<F>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'writer> FormatFields<'writer> + 'static,
    F: FormatEvent<S, N>,
{
    fn format_event(
        &self,
        ctx: &fmt::FmtContext<'_, S, N>,
        mut writer: fmt::format::Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        // まず標準フォーマットをバッファに書き出す
        let mut buf = String::new();
        self.inner
            .format_event(ctx, fmt::format::Writer::new(&mut buf), event)?;
        // マスク処理
        mask_route_b_password(&mut buf);
        // 出力
        writer.write_str(&buf)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    // プログラムの情報
    let git_head_ref = built_info::GIT_HEAD_REF.unwrap_or_default();
    let app_info = format!(
        "{} / {}{}",
        built_info::PKG_NAME,
        built_info::PKG_VERSION,
        built_info::GIT_COMMIT_HASH_SHORT
            .map(|s| format!(" ({s} - {git_head_ref})"))
            .unwrap_or_default()
    );
    // tracingの設定
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    // 計測値は標準出力に出すので、ログは標準エラー出力
    let (non_blocking, _guard) = tracing_appender::non_blocking(io::stderr());
    // systemd-journaldに接続
    match tracing_journald::layer() {
        // journaldにログ出力する
        Ok(journald_layer) => registry.with(journald_layer).init(),
        // journaldが使えないので、標準エラー出力にログ出力する
        Err(e) => {
            let format = fmt::format()
                .with_timer(LocalTime::rfc_3339())
                .with_file(false)
                .with_line_number(false)
                .with_thread_names(false)
                .with_thread_ids(false)
                .with_ansi(false);
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .event_format(MaskingRouteBPasswordFormatter { inner: format }),
                )
                .init();
            tracing::error!("couldn't connect to journald: {}", e)
        }
    }
    let (device, settings) = match load_settings(&cli) {
        Ok(a) => a,
        Err(e) => {
            tracing::error!("{app_info} aborted, reason: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    // サービスを開始する
    tracing::info!("{app_info} started.");
    let reason = loop {
        break match exec_data_acquisition(&device, &settings).await {
            Ok(Outcome::RebootRequested) => {
                tracing::warn!("restart requested");
                tokio::time::sleep(Duration::from_secs(5)).await; // 再始動まで少々クールダウン時間をもつ
                continue; // 再始動
            }
            Ok(Outcome::Interrupted) => {
                tracing::info!("{app_info} stopped.");
                return ExitCode::SUCCESS;
            }
            Err(e) => e.to_string(),
        };
    };

    // ここに到達するのは異常終了しかありえない
    tracing::error!("{app_info} aborted, reason: {reason}");
    ExitCode::FAILURE
}

#[test]
fn test1() {
    let mut buf = String::from(r#"TRACE Tx->: SKSETPWD 0C 0123456789AB\r\n"#);
    mask_route_b_password(&mut buf);
    assert_eq!(buf, r#"TRACE Tx->: SKSETPWD 0C ############\r\n"#);

    let mut buf = String::from("INFO SKSETPWD 0C");
    mask_route_b_password(&mut buf);
    assert_eq!(buf, "INFO SKSETPWD 0C");

    let mut buf = String::from("INFO SKSETRBID 00112233445566778899AABBCCDDEEFF");
    mask_route_b_password(&mut buf);
    assert_eq!(buf, "INFO SKSETRBID 00112233445566778899AABBCCDDEEFF");
}
