mod audio;
mod config;
mod gui_bridge;
mod net_link;
mod protocol;
mod timing;
mod trace;

use audio::{AlsaDevice, DuplexClient};
use config::Config;
use gui_bridge::{GuiBridge, GuiEvent, StatusForwarder};
use net_link::{Channel, NetLink};
use protocol::{ControlMessage, StatusMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;
use trace::RawDumpTrace;

/// How often level meters and jitter are pushed to the GUI.
const STATS_PERIOD: Duration = Duration::from_millis(200);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::init();

    // 加载配置
    let config = match Config::new() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Invalid configuration: {}", e);
            anyhow::bail!("invalid configuration: {}", e);
        }
    };

    // 打开声卡，双向阻塞读写
    let device = AlsaDevice::open(
        config.capture_device,
        config.playback_device,
        config.device_sample_rate,
        config.device_block_size(),
    )?;

    // 音频通道与UDP收发任务
    let channel = Arc::new(Channel::new(
        config.network_block_size(),
        config.jitter_buffer_blocks,
    ));
    let (net_link, sender) = NetLink::bind(config.local_port, channel.clone()).await?;
    log::info!("Audio socket bound to {}", net_link.local_addr()?);
    tokio::spawn(net_link.run());

    // GUI进程通道
    let (tx_gui_event, mut rx_gui_event) = mpsc::channel::<GuiEvent>(100);
    let gui_bridge = Arc::new(GuiBridge::new(&config, tx_gui_event).await?);
    let gui_bridge_clone = gui_bridge.clone();
    tokio::spawn(async move {
        if let Err(e) = gui_bridge_clone.run().await {
            log::error!("GuiBridge error: {}", e);
        }
    });

    // 音频线程的状态事件经由GUI桥转发
    let (status, status_rx) = StatusForwarder::channel();
    let gui_bridge_clone = gui_bridge.clone();
    tokio::spawn(async move { gui_bridge_clone.forward_status(status_rx).await });

    let mut client = DuplexClient::new(
        config.clone(),
        Box::new(device),
        channel.clone(),
        Arc::new(sender),
        Arc::new(status),
    );

    if !config.trace_dump_file.is_empty() {
        match RawDumpTrace::create(config.trace_dump_file) {
            Ok(trace) => client.set_trace_hook(Box::new(trace)),
            Err(e) => log::warn!("{:#}", e),
        }
    }

    if !config.server_address.is_empty() {
        if let Err(e) = client.set_server_addr(config.server_address) {
            log::warn!("{:#}", e);
        }
    }

    client.start()?;
    log::info!("llcon client started");

    let controls = client.controls();
    let stats = client.stats();
    let mut stats_tick = tokio::time::interval(STATS_PERIOD);

    loop {
        tokio::select! {
            // 监听 Ctrl+C 信号
            _ = signal::ctrl_c() => {
                log::info!("Received Ctrl+C, shutting down...");
                break;
            }

            _ = stats_tick.tick() => {
                if !client.is_running() {
                    continue;
                }
                let msg = StatusMessage::Stats {
                    level_left_db: stats.level_left_db(),
                    level_right_db: stats.level_right_db(),
                    jitter_ms: stats.jitter_ms(),
                    connected: client.is_connected(),
                };
                if let Err(e) = gui_bridge.send_message(&msg).await {
                    log::debug!("Failed to send stats to GUI: {}", e);
                }
            }

            // 监听来自GUI桥的控制消息
            Some(event) = rx_gui_event.recv() => {
                let GuiEvent::Control(msg) = event;
                log::debug!("Control from GUI: {:?}", msg);
                let result = match msg {
                    ControlMessage::Fader { value } => {
                        controls.set_fader(value);
                        Ok(())
                    }
                    ControlMessage::Reverb { level, on_left } => {
                        controls.set_reverb_level(level);
                        if let Some(on_left) = on_left {
                            controls.set_reverb_on_left(on_left);
                        }
                        Ok(())
                    }
                    ControlMessage::Server { address } => client.set_server_addr(&address),
                    ControlMessage::Start => client.start(),
                    ControlMessage::Stop => {
                        // 停止会阻塞最多几秒，不要占住异步线程
                        if tokio::task::block_in_place(|| client.stop()) {
                            Ok(())
                        } else {
                            Err(anyhow::anyhow!("audio thread did not stop in time"))
                        }
                    }
                };
                if let Err(e) = result {
                    log::warn!("{:#}", e);
                    let text = format!("{:#}", e);
                    if let Err(e) = gui_bridge.send_message(&StatusMessage::Error { text }).await {
                        log::debug!("Failed to send error to GUI: {}", e);
                    }
                }
            }
        }
    }

    if !tokio::task::block_in_place(|| client.stop()) {
        log::warn!(
            "Audio thread still blocked in the sound card ({:?}), exiting anyway",
            client.run_state()
        );
    }
    Ok(())
}
