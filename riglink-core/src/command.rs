// SPDX-License-Identifier: MIT
//
// Riglink: Remote Control Link for Split SDR Transceivers
// Copyright (c) 2025 Riglink Contributors

//! Typed view of the control record vocabulary
//!
//! Every record on the control channel maps to one [`Command`]. Parsing follows the
//! dispatch order of the host: UI-only records first, then band names, mode names,
//! the button registry, the slider registry, the fixed per-record handlers, and
//! finally "unrecognized".
//!
//! This module also owns the head's initial state dump, the ordered burst of records
//! that brings a freshly authenticated host in line with the operator's state.

use crate::codec::Record;
use crate::config::RemoteConfig;
use crate::cw::CwEvent;
use crate::error::{ProtocolError, ProtocolErrorKind};
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;

/// Records that only matter to the head's widgets; the host drops them silently
pub const UI_ONLY_HEADS: [&str; 9] = [
    "On",
    "..",
    "bandBtnGroup",
    "screenBtnGroup",
    "modeButns",
    "Scope",
    "Config",
    "RX Filter",
    "Help",
];

/// Record heads accepted by the host before authentication completes
pub const PRE_AUTH_HEADS: [&str; 3] = ["TOKEN", "QUIT", "HEARTBEAT"];

/// Source tag of the `FREQ` record sent in the initial state dump
pub const DUMP_FREQ_SOURCE: &str = "NewDecim";

/// Operating modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Cwl,
    Cwu,
    Lsb,
    Usb,
    Am,
    Fm,
    DgtU,
    DgtL,
    DgtFm,
    DgtIq,
    FdvU,
    FdvL,
}

impl Mode {
    pub const ALL: [Mode; 12] = [
        Mode::Cwl,
        Mode::Cwu,
        Mode::Lsb,
        Mode::Usb,
        Mode::Am,
        Mode::Fm,
        Mode::DgtU,
        Mode::DgtL,
        Mode::DgtFm,
        Mode::DgtIq,
        Mode::FdvU,
        Mode::FdvL,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Mode::Cwl => "CWL",
            Mode::Cwu => "CWU",
            Mode::Lsb => "LSB",
            Mode::Usb => "USB",
            Mode::Am => "AM",
            Mode::Fm => "FM",
            Mode::DgtU => "DGT-U",
            Mode::DgtL => "DGT-L",
            Mode::DgtFm => "DGT-FM",
            Mode::DgtIq => "DGT-IQ",
            Mode::FdvU => "FDV-U",
            Mode::FdvL => "FDV-L",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|m| m.name() == name)
    }

    /// Legacy split buttons whose index selects the sideband or variant
    pub fn from_alias(head: &str, index: i32) -> Option<Self> {
        let choices: &[Mode] = match head {
            "CW U/L" => &[Mode::Cwl, Mode::Cwu],
            "SSB U/L" => &[Mode::Lsb, Mode::Usb],
            "DGT" => &[Mode::DgtU, Mode::DgtL, Mode::DgtFm, Mode::DgtIq],
            "FDV" => &[Mode::FdvU, Mode::FdvL],
            _ => return None,
        };
        usize::try_from(index).ok().and_then(|i| choices.get(i)).copied()
    }

    fn is_alias_head(head: &str) -> bool {
        matches!(head, "CW U/L" | "SSB U/L" | "DGT" | "FDV")
    }
}

/// Buttons replicated by name, in initial-dump order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Button {
    Mute,
    Nr2,
    Agc,
    Sqlch,
    Nb1,
    Notch,
    Test1,
    Spot,
    Fdx,
    Ptt,
    Vox,
}

impl Button {
    pub const ALL: [Button; 11] = [
        Button::Mute,
        Button::Nr2,
        Button::Agc,
        Button::Sqlch,
        Button::Nb1,
        Button::Notch,
        Button::Test1,
        Button::Spot,
        Button::Fdx,
        Button::Ptt,
        Button::Vox,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Button::Mute => "Mute",
            Button::Nr2 => "NR2",
            Button::Agc => "AGC",
            Button::Sqlch => "Sqlch",
            Button::Nb1 => "NB 1",
            Button::Notch => "Notch",
            Button::Test1 => "Test 1",
            Button::Spot => "Spot",
            Button::Fdx => "FDX",
            Button::Ptt => "PTT",
            Button::Vox => "VOX",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|b| b.name() == name)
    }
}

/// Single-value slider controls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slider {
    Squelch,
    Spot,
    Agc,
}

impl Slider {
    pub const ALL: [Slider; 3] = [Slider::Squelch, Slider::Spot, Slider::Agc];

    pub fn name(&self) -> &'static str {
        match self {
            Slider::Squelch => "SqlchSlider",
            Slider::Spot => "SpotSlider",
            Slider::Agc => "AGCSlider",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.name() == name)
    }
}

/// Tuning update carried by `FREQ`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreqUpdate {
    /// Tuning offset from the VFO center in Hz
    pub tune: i64,
    /// VFO center frequency in Hz
    pub vfo: i64,
    /// Informational tag naming what caused the change
    pub source: String,
    pub band: String,
    /// Receive-only offset, when the Rx frequency differs from Tx
    pub rx_freq: Option<i64>,
    /// Index into the head's list of sample rates
    pub decimation: i32,
}

/// Packed AGC and squelch levels carried by `AGCSQLCH`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AgcSquelch {
    pub agc_off: i64,
    pub agc_on: i64,
    pub squelch: i64,
    pub squelch_ssb: i64,
    pub split_offset: i64,
}

/// One menu entry state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuItem {
    pub menu: String,
    pub item: String,
    pub checked: bool,
}

/// Hardware-specific readouts pushed to the head (`HL2_TEMP;temp;pa;fwd;swr`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HwReadout {
    pub key: String,
    pub fields: Vec<String>,
}

/// Handshake records
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenMsg {
    /// Host to head: 64-hex challenge
    Challenge(String),
    /// Head to host: digest and display width, both verified by the host
    Response { digest: String, data_width: String },
}

/// Host verdicts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Ok,
    Bad,
    Missing,
}

impl AuthOutcome {
    fn head(&self) -> &'static str {
        match self {
            AuthOutcome::Ok => "TOKEN_OK",
            AuthOutcome::Bad => "TOKEN_BAD",
            AuthOutcome::Missing => "TOKEN_MISSING",
        }
    }
}

/// Calls allowed through `JsonAppFunc`
///
/// The path registry is closed: anything not listed here is answered with
/// `ERR_UNSUPPORTED`, no matter how plausible the path looks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppCall {
    /// `status_label.SetLabel(text)`
    SetStatusLabel(String),
    /// `main_frame.SetTitle(text)`
    SetTitle(String),
}

type AppCallParser = fn(&[Value]) -> Option<AppCall>;

const APP_CALLS: [(&str, AppCallParser); 2] = [
    ("status_label.SetLabel", status_label_call),
    ("main_frame.SetTitle", title_call),
];

fn status_label_call(args: &[Value]) -> Option<AppCall> {
    single_string(args).map(AppCall::SetStatusLabel)
}

fn title_call(args: &[Value]) -> Option<AppCall> {
    single_string(args).map(AppCall::SetTitle)
}

fn single_string(args: &[Value]) -> Option<String> {
    match args {
        [Value::String(s)] => Some(s.clone()),
        _ => None,
    }
}

impl AppCall {
    pub fn path(&self) -> &'static str {
        match self {
            AppCall::SetStatusLabel(_) => "status_label.SetLabel",
            AppCall::SetTitle(_) => "main_frame.SetTitle",
        }
    }

    fn args(&self) -> Vec<Value> {
        match self {
            AppCall::SetStatusLabel(text) | AppCall::SetTitle(text) => {
                vec![Value::String(text.clone())]
            }
        }
    }

    fn parse(record: &Record) -> Result<Self, ProtocolError> {
        if record.args.is_empty() {
            return Err(ProtocolError::param(record, "missing JSON argument list"));
        }
        // A JSON string may have been split at a ';'
        let json = record.args.join(";");
        let list: Vec<Value> = serde_json::from_str(&json).map_err(|e| {
            ProtocolError::new(ProtocolErrorKind::BadFormat, record, e.to_string())
        })?;
        let Some((Value::String(path), args)) = list.split_first() else {
            return Err(ProtocolError::new(
                ProtocolErrorKind::BadFormat,
                record,
                "first element must be a method path",
            ));
        };
        let (_, parser) = APP_CALLS
            .iter()
            .find(|(allowed, _)| allowed == path)
            .ok_or_else(|| {
                ProtocolError::new(
                    ProtocolErrorKind::Unsupported,
                    record,
                    format!("'{}' is not callable remotely", path),
                )
            })?;
        parser(args).ok_or_else(|| ProtocolError::param(record, format!("bad arguments for {}", path)))
    }

    fn to_json(&self) -> String {
        let mut list = vec![Value::String(self.path().to_string())];
        list.extend(self.args());
        Value::Array(list).to_string()
    }
}

/// Names both ends must agree on beyond the fixed vocabulary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vocabulary {
    pub bands: Vec<String>,
    pub hw_readout_keys: Vec<String>,
}

impl Vocabulary {
    pub fn from_config(config: &RemoteConfig) -> Self {
        Self {
            bands: config.bands.clone(),
            hw_readout_keys: config.hw_readout_keys.clone(),
        }
    }

    pub fn is_band(&self, name: &str) -> bool {
        self.bands.iter().any(|b| b == name)
    }

    pub fn is_hw_readout(&self, name: &str) -> bool {
        self.hw_readout_keys.iter().any(|k| k == name)
    }
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::from_config(&RemoteConfig::default())
    }
}

/// Every command carried by the control channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// A head widget record with no meaning at the host
    UiOnly(String),
    Freq(FreqUpdate),
    Cw(CwEvent),
    Heartbeat,
    /// Head ends the session (`QUIT`)
    Quit,
    /// Host ends the session (`Q`)
    HostQuit,
    Token(TokenMsg),
    AuthResult(AuthOutcome),
    Band(String),
    Mode { mode: Mode, index: i32 },
    /// Discrete filter button `Filter <n>`
    Filter { button: u8, value: i64 },
    /// Adjustable bandwidth slider `Filter 6Slider`
    FilterBandwidth(i64),
    AgcSquelch(AgcSquelch),
    Slider { slider: Slider, value: i64 },
    Menu(MenuItem),
    Button { button: Button, value: i32 },
    Split(bool),
    AppCall(AppCall),
    /// S-meter text for the head display
    SMeter(String),
    HwReadout(HwReadout),
    /// `ERR_*` reply echoing an offending record
    ErrorReply {
        kind: ProtocolErrorKind,
        echo: Option<Record>,
    },
}

impl Command {
    /// Interpret a record
    pub fn parse(record: &Record, vocab: &Vocabulary) -> Result<Self, ProtocolError> {
        let head = record.head.as_str();

        if UI_ONLY_HEADS.contains(&head) {
            return Ok(Command::UiOnly(head.to_string()));
        }

        if vocab.is_band(head) {
            let [value] = fields::<1>(record)?;
            parse_num::<i32>(record, value)?;
            return Ok(Command::Band(head.to_string()));
        }

        if let Some(mode) = Mode::from_name(head) {
            let [index] = fields::<1>(record)?;
            let index = parse_num(record, index)?;
            return Ok(Command::Mode { mode, index });
        }
        if Mode::is_alias_head(head) {
            let [index] = fields::<1>(record)?;
            let index = parse_num(record, index)?;
            let mode = Mode::from_alias(head, index)
                .ok_or_else(|| ProtocolError::param(record, "mode index out of range"))?;
            return Ok(Command::Mode { mode, index });
        }

        if let Some(button) = Button::from_name(head) {
            let [value] = fields::<1>(record)?;
            let value = parse_num(record, value)?;
            return Ok(Command::Button { button, value });
        }

        if let Some(slider) = Slider::from_name(head) {
            let [value] = fields::<1>(record)?;
            let value = parse_num(record, value)?;
            return Ok(Command::Slider { slider, value });
        }

        match head {
            "FREQ" => {
                let [tune, vfo, source, band, rx_freq, decimation] = fields::<6>(record)?;
                let rx_freq = match rx_freq.trim() {
                    "" | "None" => None,
                    value => Some(parse_num(record, value)?),
                };
                Ok(Command::Freq(FreqUpdate {
                    tune: parse_num(record, tune)?,
                    vfo: parse_num(record, vfo)?,
                    source: source.to_string(),
                    band: band.to_string(),
                    rx_freq,
                    decimation: parse_num(record, decimation)?,
                }))
            }
            "CW" => {
                let [down, offset] = fields::<2>(record)?;
                Ok(Command::Cw(CwEvent {
                    down: parse_flag(record, down)?,
                    offset_ms: parse_num(record, offset)?,
                }))
            }
            "HEARTBEAT" => Ok(Command::Heartbeat),
            "QUIT" => Ok(Command::Quit),
            "Q" => Ok(Command::HostQuit),
            "TOKEN" => match record.args.as_slice() {
                [challenge] => Ok(Command::Token(TokenMsg::Challenge(challenge.clone()))),
                [digest, data_width] => Ok(Command::Token(TokenMsg::Response {
                    digest: digest.clone(),
                    data_width: data_width.clone(),
                })),
                _ => Err(ProtocolError::param(record, "TOKEN takes one or two fields")),
            },
            "TOKEN_OK" => Ok(Command::AuthResult(AuthOutcome::Ok)),
            "TOKEN_BAD" => Ok(Command::AuthResult(AuthOutcome::Bad)),
            "TOKEN_MISSING" => Ok(Command::AuthResult(AuthOutcome::Missing)),
            "Filter 6Slider" => {
                let [value] = fields::<1>(record)?;
                Ok(Command::FilterBandwidth(parse_num(record, value)?))
            }
            "AGCSQLCH" => {
                let [off, on, sqlch, sqlch_ssb, split] = fields::<5>(record)?;
                Ok(Command::AgcSquelch(AgcSquelch {
                    agc_off: parse_num(record, off)?,
                    agc_on: parse_num(record, on)?,
                    squelch: parse_num(record, sqlch)?,
                    squelch_ssb: parse_num(record, sqlch_ssb)?,
                    split_offset: parse_num(record, split)?,
                }))
            }
            "MENU" => {
                let [menu, item, checked] = fields::<3>(record)?;
                Ok(Command::Menu(MenuItem {
                    menu: menu.to_string(),
                    item: item.to_string(),
                    checked: parse_flag(record, checked)?,
                }))
            }
            "Split" => {
                let [value] = fields::<1>(record)?;
                Ok(Command::Split(parse_flag(record, value)?))
            }
            "JsonAppFunc" => AppCall::parse(record).map(Command::AppCall),
            "M" => {
                let [text] = fields::<1>(record)?;
                Ok(Command::SMeter(text.to_string()))
            }
            _ => Self::parse_tail(record, vocab),
        }
    }

    fn parse_tail(record: &Record, vocab: &Vocabulary) -> Result<Self, ProtocolError> {
        let head = record.head.as_str();

        if let Some(n) = head.strip_prefix("Filter ") {
            let button = n
                .parse::<u8>()
                .ok()
                .filter(|n| (1..=6).contains(n))
                .ok_or_else(|| {
                    ProtocolError::new(ProtocolErrorKind::Unrecognized, record, "no such filter")
                })?;
            let [value] = fields::<1>(record)?;
            return Ok(Command::Filter {
                button,
                value: parse_num(record, value)?,
            });
        }

        if vocab.is_hw_readout(head) {
            return Ok(Command::HwReadout(HwReadout {
                key: head.to_string(),
                fields: record.args.clone(),
            }));
        }

        if let Some(kind) = ProtocolErrorKind::from_reply_head(head) {
            return Ok(Command::ErrorReply { kind, echo: None });
        }
        if let Some((kind, echoed_head)) = head
            .split_once(": ")
            .and_then(|(k, h)| ProtocolErrorKind::from_reply_head(k).map(|k| (k, h)))
        {
            return Ok(Command::ErrorReply {
                kind,
                echo: Some(Record::new(echoed_head, record.args.clone())),
            });
        }

        Err(ProtocolError::new(
            ProtocolErrorKind::Unrecognized,
            record,
            "unknown command",
        ))
    }

    /// Render the command as a record
    pub fn to_record(&self) -> Record {
        match self {
            Command::UiOnly(head) => Record::bare(head.clone()),
            Command::Freq(f) => Record::new(
                "FREQ",
                [
                    f.tune.to_string(),
                    f.vfo.to_string(),
                    f.source.clone(),
                    f.band.clone(),
                    f.rx_freq.map_or_else(|| "None".to_string(), |r| r.to_string()),
                    f.decimation.to_string(),
                ],
            ),
            Command::Cw(event) => Record::new(
                "CW",
                [flag(event.down).to_string(), event.offset_ms.to_string()],
            ),
            Command::Heartbeat => Record::bare("HEARTBEAT"),
            Command::Quit => Record::bare("QUIT"),
            Command::HostQuit => Record::bare("Q"),
            Command::Token(TokenMsg::Challenge(challenge)) => Record::new("TOKEN", [challenge.clone()]),
            Command::Token(TokenMsg::Response { digest, data_width }) => {
                Record::new("TOKEN", [digest.clone(), data_width.clone()])
            }
            Command::AuthResult(outcome) => Record::bare(outcome.head()),
            Command::Band(band) => Record::new(band.clone(), ["1"]),
            Command::Mode { mode, index } => Record::new(mode.name(), [index.to_string()]),
            Command::Filter { button, value } => {
                Record::new(format!("Filter {}", button), [value.to_string()])
            }
            Command::FilterBandwidth(value) => Record::new("Filter 6Slider", [value.to_string()]),
            Command::AgcSquelch(a) => Record::new(
                "AGCSQLCH",
                [a.agc_off, a.agc_on, a.squelch, a.squelch_ssb, a.split_offset].map(|v| v.to_string()),
            ),
            Command::Slider { slider, value } => Record::new(slider.name(), [value.to_string()]),
            Command::Menu(m) => Record::new(
                "MENU",
                [m.menu.clone(), m.item.clone(), flag(m.checked).to_string()],
            ),
            Command::Button { button, value } => Record::new(button.name(), [value.to_string()]),
            Command::Split(on) => Record::new("Split", [flag(*on).to_string()]),
            Command::AppCall(call) => Record::new("JsonAppFunc", [call.to_json()]),
            Command::SMeter(text) => Record::new("M", [text.clone()]),
            Command::HwReadout(r) => Record::new(r.key.clone(), r.fields.clone()),
            Command::ErrorReply { kind, echo } => match echo {
                Some(echo) => Record::new(format!("{}: {}", kind.reply_head(), echo.head), echo.args.clone()),
                None => Record::bare(kind.reply_head()),
            },
        }
    }
}

fn fields<const N: usize>(record: &Record) -> Result<[&str; N], ProtocolError> {
    let args: Vec<&str> = record.args.iter().map(String::as_str).collect();
    args.try_into().map_err(|_| {
        ProtocolError::param(
            record,
            format!("expected {} field(s), got {}", N, record.args.len()),
        )
    })
}

fn parse_num<T: FromStr>(record: &Record, text: &str) -> Result<T, ProtocolError> {
    text.trim()
        .parse()
        .map_err(|_| ProtocolError::param(record, format!("'{}' is not a number", text)))
}

fn parse_flag(record: &Record, text: &str) -> Result<bool, ProtocolError> {
    match text.trim() {
        "1" | "True" | "true" => Ok(true),
        "0" | "False" | "false" => Ok(false),
        other => Err(ProtocolError::param(record, format!("'{}' is not a flag", other))),
    }
}

fn flag(on: bool) -> &'static str {
    if on {
        "1"
    } else {
        "0"
    }
}

/// Operator state as read from the UI adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioSnapshot {
    pub freq: FreqUpdate,
    pub band: String,
    pub mode: Mode,
    pub mode_index: i32,
    pub filter_bandwidth: i64,
    /// Selected discrete filter button and its index value
    pub filter_button: u8,
    pub filter_index: i32,
    pub agc_squelch: AgcSquelch,
    pub squelch_slider: i64,
    pub spot_slider: i64,
    pub buttons: HashMap<Button, i32>,
    pub menus: Vec<MenuItem>,
}

impl Default for RadioSnapshot {
    fn default() -> Self {
        Self {
            freq: FreqUpdate {
                tune: 0,
                vfo: 7_000_000,
                source: DUMP_FREQ_SOURCE.to_string(),
                band: "40".to_string(),
                rx_freq: None,
                decimation: 0,
            },
            band: "40".to_string(),
            mode: Mode::Lsb,
            mode_index: 1,
            filter_bandwidth: 2_700,
            filter_button: 3,
            filter_index: 1,
            agc_squelch: AgcSquelch::default(),
            squelch_slider: 0,
            spot_slider: 0,
            buttons: HashMap::new(),
            menus: Vec::new(),
        }
    }
}

impl RadioSnapshot {
    /// Fold an operator command into the snapshot so the next dump replays it
    ///
    /// PTT is never remembered: a reconnect must not key the transmitter.
    pub fn apply(&mut self, command: &Command) {
        match command {
            Command::Freq(freq) => self.freq = freq.clone(),
            Command::Band(band) => self.band = band.clone(),
            Command::Mode { mode, index } => {
                self.mode = *mode;
                self.mode_index = *index;
            }
            Command::FilterBandwidth(hz) => self.filter_bandwidth = *hz,
            Command::Filter { button, value } => {
                if let Ok(index) = i32::try_from(*value) {
                    self.filter_button = *button;
                    self.filter_index = index;
                }
            }
            Command::AgcSquelch(levels) => self.agc_squelch = *levels,
            Command::Slider { slider: Slider::Squelch, value } => self.squelch_slider = *value,
            Command::Slider { slider: Slider::Spot, value } => self.spot_slider = *value,
            Command::Button { button: Button::Ptt, .. } => {}
            Command::Button { button, value } => {
                self.buttons.insert(*button, *value);
            }
            Command::Menu(item) => {
                match self
                    .menus
                    .iter_mut()
                    .find(|known| known.menu == item.menu && known.item == item.item)
                {
                    Some(known) => known.checked = item.checked,
                    None => self.menus.push(item.clone()),
                }
            }
            _ => {}
        }
    }
}

/// Build the ordered initial state dump for a snapshot
pub fn initial_state_dump(snapshot: &RadioSnapshot) -> Vec<Command> {
    let mut dump = Vec::with_capacity(10 + Button::ALL.len() + snapshot.menus.len());

    dump.push(Command::Freq(FreqUpdate {
        source: DUMP_FREQ_SOURCE.to_string(),
        ..snapshot.freq.clone()
    }));
    dump.push(Command::Band(snapshot.band.clone()));
    dump.push(Command::Mode {
        mode: snapshot.mode,
        index: snapshot.mode_index,
    });
    dump.push(Command::FilterBandwidth(snapshot.filter_bandwidth));
    dump.push(Command::Filter {
        button: snapshot.filter_button,
        value: i64::from(snapshot.filter_index),
    });
    dump.push(Command::Split(false));
    dump.push(Command::AgcSquelch(snapshot.agc_squelch));
    dump.push(Command::Slider {
        slider: Slider::Squelch,
        value: snapshot.squelch_slider,
    });
    dump.push(Command::Slider {
        slider: Slider::Spot,
        value: snapshot.spot_slider,
    });
    for button in Button::ALL {
        dump.push(Command::Button {
            button,
            value: snapshot.buttons.get(&button).copied().unwrap_or(0),
        });
    }
    for item in &snapshot.menus {
        dump.push(Command::Menu(item.clone()));
    }
    dump
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Result<Command, ProtocolError> {
        Command::parse(&Record::from_line(line), &Vocabulary::default())
    }

    #[test]
    fn test_freq_record() {
        let cmd = parse("FREQ;1500;7000000;NewDecim;40;None;2").unwrap();
        assert_eq!(
            cmd,
            Command::Freq(FreqUpdate {
                tune: 1500,
                vfo: 7_000_000,
                source: "NewDecim".to_string(),
                band: "40".to_string(),
                rx_freq: None,
                decimation: 2,
            })
        );
        assert_eq!(cmd.to_record().to_line(), "FREQ;1500;7000000;NewDecim;40;None;2");

        let with_rx = parse("FREQ;0;14000000;tune;20;-200;0").unwrap();
        assert!(matches!(with_rx, Command::Freq(FreqUpdate { rx_freq: Some(-200), .. })));
    }

    #[test]
    fn test_param_errors() {
        let err = parse("FREQ;1500;7000000").unwrap_err();
        assert_eq!(err.kind, ProtocolErrorKind::Param);
        let err = parse("CW;1;soon").unwrap_err();
        assert_eq!(err.kind, ProtocolErrorKind::Param);
        let err = parse("MENU;Rate;48000;maybe").unwrap_err();
        assert_eq!(err.kind, ProtocolErrorKind::Param);
    }

    #[test]
    fn test_unrecognized() {
        let err = parse("NotARealCommand;1").unwrap_err();
        assert_eq!(err.kind, ProtocolErrorKind::Unrecognized);
        assert_eq!(
            err.to_record().to_line(),
            "ERR_UNRECOGNIZED_CMD: NotARealCommand;1"
        );
        assert_eq!(parse("Filter 9;1").unwrap_err().kind, ProtocolErrorKind::Unrecognized);
    }

    #[test]
    fn test_error_reply_roundtrip() {
        let cmd = parse("ERR_UNRECOGNIZED_CMD: NotARealCommand;1").unwrap();
        assert_eq!(
            cmd,
            Command::ErrorReply {
                kind: ProtocolErrorKind::Unrecognized,
                echo: Some(Record::new("NotARealCommand", ["1"])),
            }
        );
    }

    #[test]
    fn test_mode_aliases() {
        assert_eq!(
            parse("CW U/L;0").unwrap(),
            Command::Mode { mode: Mode::Cwl, index: 0 }
        );
        assert_eq!(
            parse("SSB U/L;1").unwrap(),
            Command::Mode { mode: Mode::Usb, index: 1 }
        );
        assert_eq!(
            parse("DGT;3").unwrap(),
            Command::Mode { mode: Mode::DgtIq, index: 3 }
        );
        assert_eq!(parse("FDV;2").unwrap_err().kind, ProtocolErrorKind::Param);
        assert_eq!(
            parse("DGT-FM;1").unwrap(),
            Command::Mode { mode: Mode::DgtFm, index: 1 }
        );
    }

    #[test]
    fn test_registries() {
        assert_eq!(parse("40;1").unwrap(), Command::Band("40".to_string()));
        assert_eq!(
            parse("NB 1;1").unwrap(),
            Command::Button { button: Button::Nb1, value: 1 }
        );
        assert_eq!(
            parse("AGCSlider;500").unwrap(),
            Command::Slider { slider: Slider::Agc, value: 500 }
        );
        assert_eq!(parse("Help").unwrap(), Command::UiOnly("Help".to_string()));
        assert_eq!(parse("Filter 6Slider;2800").unwrap(), Command::FilterBandwidth(2800));
        assert_eq!(
            parse("Filter 2;1").unwrap(),
            Command::Filter { button: 2, value: 1 }
        );
    }

    #[test]
    fn test_token_shapes() {
        assert!(matches!(
            parse("TOKEN;abcd").unwrap(),
            Command::Token(TokenMsg::Challenge(_))
        ));
        assert!(matches!(
            parse("TOKEN;abcd;1200").unwrap(),
            Command::Token(TokenMsg::Response { .. })
        ));
        assert_eq!(parse("TOKEN").unwrap_err().kind, ProtocolErrorKind::Param);
    }

    #[test]
    fn test_app_call_whitelist() {
        let cmd = parse(r#"JsonAppFunc;["status_label.SetLabel", "Remote"]"#).unwrap();
        assert_eq!(cmd, Command::AppCall(AppCall::SetStatusLabel("Remote".to_string())));
        let line = cmd.to_record().to_line();
        assert_eq!(parse(&line).unwrap(), cmd);

        let err = parse(r#"JsonAppFunc;["os.system", "rm -rf /"]"#).unwrap_err();
        assert_eq!(err.kind, ProtocolErrorKind::Unsupported);
        let err = parse("JsonAppFunc;[not json").unwrap_err();
        assert_eq!(err.kind, ProtocolErrorKind::BadFormat);
        let err = parse(r#"JsonAppFunc;["main_frame.SetTitle", 3]"#).unwrap_err();
        assert_eq!(err.kind, ProtocolErrorKind::Param);
    }

    #[test]
    fn test_hw_readout() {
        let cmd = parse("HL2_TEMP;41.5;0.8;4.9;1.2").unwrap();
        assert_eq!(
            cmd,
            Command::HwReadout(HwReadout {
                key: "HL2_TEMP".to_string(),
                fields: vec!["41.5", "0.8", "4.9", "1.2"].into_iter().map(String::from).collect(),
            })
        );
    }

    #[test]
    fn test_initial_dump_order() {
        let mut snapshot = RadioSnapshot::default();
        snapshot.buttons.insert(Button::Mute, 1);
        snapshot.menus.push(MenuItem {
            menu: "Rate".to_string(),
            item: "48000".to_string(),
            checked: true,
        });
        let lines: Vec<String> = initial_state_dump(&snapshot)
            .iter()
            .map(|c| c.to_record().to_line())
            .collect();

        assert_eq!(lines[0], "FREQ;0;7000000;NewDecim;40;None;0");
        assert_eq!(lines[1], "40;1");
        assert_eq!(lines[2], "LSB;1");
        assert_eq!(lines[3], "Filter 6Slider;2700");
        assert_eq!(lines[4], "Filter 3;1");
        assert_eq!(lines[5], "Split;0");
        assert_eq!(lines[6], "AGCSQLCH;0;0;0;0;0");
        assert_eq!(lines[7], "SqlchSlider;0");
        assert_eq!(lines[8], "SpotSlider;0");
        assert_eq!(lines[9], "Mute;1");
        assert_eq!(lines[19], "VOX;0");
        assert_eq!(lines[20], "MENU;Rate;48000;1");
        assert_eq!(lines.len(), 21);
    }

    #[test]
    fn test_snapshot_replays_operator_changes() {
        let mut snapshot = RadioSnapshot::default();
        for line in [
            "FREQ;500;14074000;tune;20;None;0",
            "20;1",
            "USB;1",
            "Mute;1",
            "PTT;1",
            "MENU;Rate;48000;1",
            "MENU;Rate;48000;0",
        ] {
            snapshot.apply(&parse(line).unwrap());
        }

        let lines: Vec<String> = initial_state_dump(&snapshot)
            .iter()
            .map(|c| c.to_record().to_line())
            .collect();
        assert_eq!(lines[0], "FREQ;500;14074000;NewDecim;20;None;0");
        assert_eq!(lines[1], "20;1");
        assert_eq!(lines[2], "USB;1");
        assert_eq!(lines[9], "Mute;1");
        assert!(lines.contains(&"PTT;0".to_string()));
        assert_eq!(lines[20], "MENU;Rate;48000;0");
        assert_eq!(lines.len(), 21);
    }
}
