//! Secondary control channel: text commands over an encrypted TCP stream.
//!
//! Replies arrive as unsolicited lines (`VOL:12`, `APP:...`) and are
//! published as [`SessionEvent::IpControl`] events.

use crate::codec::SecureCodec;
use crate::error::{Error, Result};
use crate::events::{emit, EventSender, IpControlEvent, SessionEvent};
use log::{debug, trace, warn};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time;

const READ_BUFFER_SIZE: usize = 1024;

/// Keys accepted by `KEY_ACTION`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpControlKey {
    Exit,
    ChannelUp,
    ChannelDown,
    VolumeUp,
    VolumeDown,
    ArrowRight,
    ArrowLeft,
    ArrowUp,
    ArrowDown,
    VolumeMute,
    DeviceInput,
    SleepReserve,
    LiveTv,
    PreviousChannel,
    FavoriteChannel,
    Teletext,
    TeletextOption,
    ReturnBack,
    AvMode,
    CaptionSubtitle,
    MyApp,
    SettingMenu,
    Ok,
    QuickMenu,
    VideoMode,
    AudioMode,
    ChannelList,
    BlueButton,
    YellowButton,
    GreenButton,
    RedButton,
    AspectRatio,
    AudioDescription,
    ProgramOrder,
    UserGuide,
    SmartHome,
    SimpleLink,
    FastForward,
    Rewind,
    ProgramInfo,
    ProgramGuide,
    Play,
    SlowPlay,
    SoccerScreen,
    Record,
    AutoConfig,
    App,
    ScreenBright,
    Number(u8),
}

impl IpControlKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exit => "exit",
            Self::ChannelUp => "channelup",
            Self::ChannelDown => "channeldown",
            Self::VolumeUp => "volumeup",
            Self::VolumeDown => "volumedown",
            Self::ArrowRight => "arrowright",
            Self::ArrowLeft => "arrowleft",
            Self::ArrowUp => "arrowup",
            Self::ArrowDown => "arrowdown",
            Self::VolumeMute => "volumemute",
            Self::DeviceInput => "deviceinput",
            Self::SleepReserve => "sleepreserve",
            Self::LiveTv => "livetv",
            Self::PreviousChannel => "previouschannel",
            Self::FavoriteChannel => "favoritechannel",
            Self::Teletext => "teletext",
            Self::TeletextOption => "teletextoption",
            Self::ReturnBack => "returnback",
            Self::AvMode => "avmode",
            Self::CaptionSubtitle => "captionsubtitle",
            Self::MyApp => "myapp",
            Self::SettingMenu => "settingmenu",
            Self::Ok => "ok",
            Self::QuickMenu => "quickmenu",
            Self::VideoMode => "videomode",
            Self::AudioMode => "audiomode",
            Self::ChannelList => "channellist",
            Self::BlueButton => "bluebutton",
            Self::YellowButton => "yellowbutton",
            Self::GreenButton => "greenbutton",
            Self::RedButton => "redbutton",
            Self::AspectRatio => "aspectratio",
            Self::AudioDescription => "audiodescription",
            Self::ProgramOrder => "programmorder",
            Self::UserGuide => "userguide",
            Self::SmartHome => "smarthome",
            Self::SimpleLink => "simplelink",
            Self::FastForward => "fastforward",
            Self::Rewind => "rewind",
            Self::ProgramInfo => "programminfo",
            Self::ProgramGuide => "programguide",
            Self::Play => "play",
            Self::SlowPlay => "slowplay",
            Self::SoccerScreen => "soccerscreen",
            Self::Record => "reord",
            Self::AutoConfig => "autoconfig",
            Self::App => "app",
            Self::ScreenBright => "screenbright",
            Self::Number(0) => "number0",
            Self::Number(1) => "number1",
            Self::Number(2) => "number2",
            Self::Number(3) => "number3",
            Self::Number(4) => "number4",
            Self::Number(5) => "number5",
            Self::Number(6) => "number6",
            Self::Number(7) => "number7",
            Self::Number(8) => "number8",
            Self::Number(_) => "number9",
        }
    }
}

impl std::str::FromStr for IpControlKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.to_ascii_lowercase();
        if let Some(digit) = name.strip_prefix("number") {
            return match digit.parse::<u8>() {
                Ok(n) if n <= 9 => Ok(Self::Number(n)),
                _ => Err(Error::Other(format!("unknown key: {}", s))),
            };
        }

        let key = match name.as_str() {
            "exit" => Self::Exit,
            "channelup" => Self::ChannelUp,
            "channeldown" => Self::ChannelDown,
            "volumeup" => Self::VolumeUp,
            "volumedown" => Self::VolumeDown,
            "arrowright" | "right" => Self::ArrowRight,
            "arrowleft" | "left" => Self::ArrowLeft,
            "arrowup" | "up" => Self::ArrowUp,
            "arrowdown" | "down" => Self::ArrowDown,
            "volumemute" | "mute" => Self::VolumeMute,
            "deviceinput" => Self::DeviceInput,
            "sleepreserve" => Self::SleepReserve,
            "livetv" => Self::LiveTv,
            "previouschannel" => Self::PreviousChannel,
            "favoritechannel" => Self::FavoriteChannel,
            "teletext" => Self::Teletext,
            "teletextoption" => Self::TeletextOption,
            "returnback" | "back" => Self::ReturnBack,
            "avmode" => Self::AvMode,
            "captionsubtitle" => Self::CaptionSubtitle,
            "myapp" => Self::MyApp,
            "settingmenu" | "settings" => Self::SettingMenu,
            "ok" | "enter" => Self::Ok,
            "quickmenu" => Self::QuickMenu,
            "videomode" => Self::VideoMode,
            "audiomode" => Self::AudioMode,
            "channellist" => Self::ChannelList,
            "bluebutton" => Self::BlueButton,
            "yellowbutton" => Self::YellowButton,
            "greenbutton" => Self::GreenButton,
            "redbutton" => Self::RedButton,
            "aspectratio" => Self::AspectRatio,
            "audiodescription" => Self::AudioDescription,
            "programmorder" => Self::ProgramOrder,
            "userguide" => Self::UserGuide,
            "smarthome" | "home" => Self::SmartHome,
            "simplelink" => Self::SimpleLink,
            "fastforward" => Self::FastForward,
            "rewind" => Self::Rewind,
            "programminfo" => Self::ProgramInfo,
            "programguide" => Self::ProgramGuide,
            "play" => Self::Play,
            "slowplay" => Self::SlowPlay,
            "soccerscreen" => Self::SoccerScreen,
            "reord" | "record" => Self::Record,
            "autoconfig" => Self::AutoConfig,
            "app" => Self::App,
            "screenbright" => Self::ScreenBright,
            _ => return Err(Error::Other(format!("unknown key: {}", s))),
        };
        Ok(key)
    }
}

/// Inputs accepted by `INPUT_SELECT`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpControlInput {
    Atv,
    Av1,
    Catv,
    Component1,
    Dtv,
    Hdmi1,
    Hdmi2,
    Hdmi3,
}

impl IpControlInput {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Atv => "atv",
            Self::Av1 => "avav1",
            Self::Catv => "catv",
            Self::Component1 => "component1",
            Self::Dtv => "dtv",
            Self::Hdmi1 => "hdmi1",
            Self::Hdmi2 => "hdmi2",
            Self::Hdmi3 => "hdmi3",
        }
    }
}

impl std::str::FromStr for IpControlInput {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "atv" => Ok(Self::Atv),
            "avav1" | "av1" => Ok(Self::Av1),
            "catv" => Ok(Self::Catv),
            "component1" => Ok(Self::Component1),
            "dtv" => Ok(Self::Dtv),
            "hdmi1" => Ok(Self::Hdmi1),
            "hdmi2" => Ok(Self::Hdmi2),
            "hdmi3" => Ok(Self::Hdmi3),
            other => Err(Error::Other(format!("unknown input: {}", other))),
        }
    }
}

/// Classify one decoded reply line
pub fn parse_reply(line: &str) -> IpControlEvent {
    let line = line.trim();
    if let Some(volume) = line.strip_prefix("VOL:") {
        return match volume.trim().parse::<i32>() {
            Ok(volume) => IpControlEvent::Volume(volume),
            Err(_) => IpControlEvent::Error(line.to_string()),
        };
    }
    if let Some(app) = line.strip_prefix("APP:") {
        return IpControlEvent::App(app.trim().to_string());
    }
    if let Some(channel) = line.strip_prefix("CH:") {
        return IpControlEvent::Channel(channel.trim().to_string());
    }
    if let Some(mute) = line.strip_prefix("MUTE:") {
        return IpControlEvent::Mute(mute.trim().eq_ignore_ascii_case("on"));
    }
    IpControlEvent::Error(line.to_string())
}

/// Client of the secondary channel.
///
/// Connects lazily on the first command and reconnects on the next command
/// after the connection dropped.
pub struct IpControlClient {
    addr: String,
    codec: Arc<SecureCodec>,
    events: EventSender,
    connect_timeout: Duration,
    write_timeout: Duration,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for IpControlClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpControlClient")
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

impl IpControlClient {
    pub fn new(
        host: &str,
        port: u16,
        codec: SecureCodec,
        events: EventSender,
        connect_timeout: Duration,
        write_timeout: Duration,
    ) -> Self {
        Self {
            addr: format!("{}:{}", host, port),
            codec: Arc::new(codec),
            events,
            connect_timeout,
            write_timeout,
            writer: tokio::sync::Mutex::new(None),
            reader: Mutex::new(None),
        }
    }

    fn replace_reader(&self, task: Option<JoinHandle<()>>) {
        let mut reader = self
            .reader
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(old) = reader.take() {
            old.abort();
        }
        *reader = task;
    }

    /// Open (or reopen) the channel
    pub async fn connect(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        self.open(&mut writer).await
    }

    async fn open(&self, writer: &mut Option<OwnedWriteHalf>) -> Result<()> {
        if let Some(mut old) = writer.take() {
            let _ = old.shutdown().await;
        }

        debug!("Connecting secondary channel to {}", self.addr);
        let stream = match time::timeout(self.connect_timeout, TcpStream::connect(&self.addr)).await {
            Ok(stream) => stream?,
            Err(_) => {
                return Err(Error::Timeout(format!(
                    "secondary channel connect to {} after {:?}",
                    self.addr, self.connect_timeout
                )))
            }
        };

        let (read_half, write_half) = stream.into_split();
        let task = tokio::spawn(read_replies(
            read_half,
            Arc::clone(&self.codec),
            self.events.clone(),
        ));
        self.replace_reader(Some(task));
        *writer = Some(write_half);
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.writer.lock().await.is_some()
    }

    /// Encrypt and send one command line
    pub async fn send_command(&self, command: &str) -> Result<()> {
        let frame = self.codec.encode(command)?;

        let mut writer = self.writer.lock().await;
        if writer.is_none() {
            self.open(&mut writer).await?;
        }
        let Some(stream) = writer.as_mut() else {
            return Err(Error::NotConnected("secondary channel".to_string()));
        };

        trace!("Secondary channel <- {}", command);
        let written = time::timeout(self.write_timeout, async {
            stream.write_all(&frame).await?;
            stream.flush().await
        })
        .await;

        match written {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                writer.take();
                Err(e.into())
            }
            Err(_) => {
                warn!("Secondary channel write stalled; closing output");
                if let Some(mut stream) = writer.take() {
                    let _ = stream.shutdown().await;
                }
                Err(Error::Timeout(format!(
                    "secondary channel write after {:?}",
                    self.write_timeout
                )))
            }
        }
    }

    pub async fn launch_app(&self, app_id: &str) -> Result<()> {
        self.send_command(&format!("APP_LAUNCH {}", app_id)).await
    }

    pub async fn get_mute(&self) -> Result<()> {
        self.send_command("MUTE_STATE").await
    }

    pub async fn get_channel(&self) -> Result<()> {
        self.send_command("CURRENT_CH").await
    }

    pub async fn get_app(&self) -> Result<()> {
        self.send_command("CURRENT_APP").await
    }

    pub async fn get_volume(&self) -> Result<()> {
        self.send_command("CURRENT_VOL").await
    }

    /// Ask for the MAC address of `device` (`wired` or `wifi`)
    pub async fn get_mac_address(&self, device: &str) -> Result<()> {
        self.send_command(&format!("GET_MACADDRESS {}", device)).await
    }

    pub async fn send_key(&self, key: IpControlKey) -> Result<()> {
        self.send_command(&format!("KEY_ACTION {}", key.as_str())).await
    }

    pub async fn switch_input(&self, input: IpControlInput) -> Result<()> {
        self.send_command(&format!("INPUT_SELECT {}", input.as_str()))
            .await
    }

    pub async fn disconnect(&self) {
        if let Some(mut stream) = self.writer.lock().await.take() {
            let _ = stream.shutdown().await;
        }
        self.replace_reader(None);
    }
}

impl Drop for IpControlClient {
    fn drop(&mut self) {
        self.replace_reader(None);
    }
}

// Each read is one frame; the device writes a reply in a single segment.
async fn read_replies(mut stream: OwnedReadHalf, codec: Arc<SecureCodec>, events: EventSender) {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) => {
                debug!("Secondary channel closed by television");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                debug!("Secondary channel read failed: {}", e);
                break;
            }
        };

        match codec.decode(&buf[..n]) {
            Ok(line) => {
                trace!("Secondary channel -> {}", line);
                emit(&events, SessionEvent::IpControl(parse_reply(&line)));
            }
            Err(e) => {
                warn!("Undecodable secondary channel frame: {}", e);
                emit(&events, SessionEvent::MessageError(e.to_string()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reply() {
        assert_eq!(parse_reply("VOL:12"), IpControlEvent::Volume(12));
        assert_eq!(
            parse_reply("APP:com.webos.app.hdmi1"),
            IpControlEvent::App("com.webos.app.hdmi1".to_string())
        );
        assert_eq!(parse_reply("CH:7"), IpControlEvent::Channel("7".to_string()));
        assert_eq!(parse_reply("MUTE:on"), IpControlEvent::Mute(true));
        assert_eq!(parse_reply("MUTE:off"), IpControlEvent::Mute(false));
        assert_eq!(parse_reply("OK"), IpControlEvent::Error("OK".to_string()));
        assert_eq!(
            parse_reply("VOL:loud"),
            IpControlEvent::Error("VOL:loud".to_string())
        );
    }

    #[test]
    fn test_key_names() {
        assert_eq!(IpControlKey::Record.as_str(), "reord");
        assert_eq!(IpControlKey::Number(7).as_str(), "number7");
        assert_eq!("number3".parse::<IpControlKey>().unwrap(), IpControlKey::Number(3));
        assert_eq!("HOME".parse::<IpControlKey>().unwrap(), IpControlKey::SmartHome);
        assert!("number10".parse::<IpControlKey>().is_err());
        assert_eq!("av1".parse::<IpControlInput>().unwrap().as_str(), "avav1");
    }
}
