use crate::config::Config;
use crate::protocol::{ControlMessage, StatusEvent, StatusMessage, StatusSink};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

/// Status events queued between the audio thread and the bridge task.
const STATUS_QUEUE_LEN: usize = 256;

pub enum GuiEvent {
    Control(ControlMessage),
}

pub struct GuiBridge {
    socket: Arc<UdpSocket>,
    target_addr: String,
    tx: mpsc::Sender<GuiEvent>,
    buffer_size: usize,
}

// GUI进程和Core进程通过本地UDP通信，端口在配置中指定
impl GuiBridge {
    pub async fn new(config: &Config, tx: mpsc::Sender<GuiEvent>) -> anyhow::Result<Self> {
        // 绑定本地UDP端口
        let socket =
            UdpSocket::bind(format!("{}:{}", config.gui_local_ip, config.gui_local_port)).await?;
        let target_addr = format!("{}:{}", config.gui_remote_ip, config.gui_remote_port);

        Ok(Self {
            socket: Arc::new(socket),
            target_addr,
            tx,
            buffer_size: config.gui_buffer_size,
        })
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let mut buf = vec![0u8; self.buffer_size];
        loop {
            // 通过UDP socket接收消息
            let (len, _) = self.socket.recv_from(&mut buf).await?;
            if len == 0 {
                continue;
            }
            match serde_json::from_slice::<ControlMessage>(&buf[..len]) {
                Ok(msg) => {
                    if let Err(e) = self.tx.send(GuiEvent::Control(msg)).await {
                        log::warn!("Failed to send GUI event: {}", e);
                        break;
                    }
                }
                Err(e) => log::warn!("Ignoring malformed GUI message: {}", e),
            }
        }
        Ok(())
    }

    pub async fn send_message(&self, msg: &StatusMessage) -> anyhow::Result<()> {
        let json = serde_json::to_vec(msg)?;
        self.socket.send_to(&json, &self.target_addr).await?;
        Ok(())
    }

    /// Forward status events from the audio thread until the sender side is
    /// dropped. Only changes are sent, the loop repeats its LED state every block.
    pub async fn forward_status(&self, mut rx: mpsc::Receiver<StatusEvent>) {
        let mut leds = LedState::default();
        while let Some(event) = rx.recv().await {
            if !leds.update(event) {
                continue;
            }
            if let Err(e) = self.send_message(&StatusMessage::Status { event }).await {
                log::debug!("Failed to send status to GUI: {}", e);
            }
        }
    }
}

/// Last reported state of the input, output and receive LEDs.
#[derive(Default)]
struct LedState {
    input: Option<StatusEvent>,
    output: Option<StatusEvent>,
    receive: Option<StatusEvent>,
}

impl LedState {
    /// Record `event`, returning whether it changes what the GUI shows.
    fn update(&mut self, event: StatusEvent) -> bool {
        let slot = match event {
            StatusEvent::InputOk | StatusEvent::InputFail => &mut self.input,
            StatusEvent::OutputOk | StatusEvent::OutputFail => &mut self.output,
            StatusEvent::ReceiveOk | StatusEvent::ReceiveFail => &mut self.receive,
            StatusEvent::ResetAll => {
                *self = Self::default();
                return true;
            }
        };
        if *slot == Some(event) {
            return false;
        }
        *slot = Some(event);
        true
    }
}

/// [`StatusSink`] for the audio thread: queues events for
/// [`GuiBridge::forward_status`] without ever blocking.
pub struct StatusForwarder {
    tx: mpsc::Sender<StatusEvent>,
}

impl StatusForwarder {
    pub fn channel() -> (Self, mpsc::Receiver<StatusEvent>) {
        let (tx, rx) = mpsc::channel(STATUS_QUEUE_LEN);
        (Self { tx }, rx)
    }
}

impl StatusSink for StatusForwarder {
    fn post(&self, event: StatusEvent) {
        // a full queue only loses a repeated LED state
        let _ = self.tx.try_send(event);
    }
}
