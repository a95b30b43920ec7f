// Events, token types and the dense event <-> token index.
//
// An `Event` is a token type plus a value string, written `Type_value`
// (`Pitch_60`, `Duration_1.0.8`, `TimeSig_3/4`, `Bar_None`). A `Vocabulary`
// assigns each admissible event a dense integer in insertion order. The
// order is chosen by the encoding strategy; when padding is enabled,
// `PAD_None` always takes index 0. Multi-stream encodings own one
// vocabulary per stream.
//
// Lookups are split by key kind: `event_to_token` (by event string),
// `token_to_event` (by index) and `token_type` (by index).

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Category of a token. Drives the token-type graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TokenType {
    Pitch,
    Velocity,
    Duration,
    TimeShift,
    NoteOn,
    NoteOff,
    Tempo,
    TimeSig,
    Rest,
    Bar,
    Position,
    Family,
    Ignore,
    Pad,
    Sos,
    Eos,
    Mask,
}

impl TokenType {
    pub const SPECIALS: [TokenType; 4] = [
        TokenType::Pad,
        TokenType::Sos,
        TokenType::Eos,
        TokenType::Mask,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TokenType::Pitch => "Pitch",
            TokenType::Velocity => "Velocity",
            TokenType::Duration => "Duration",
            TokenType::TimeShift => "Time-Shift",
            TokenType::NoteOn => "Note-On",
            TokenType::NoteOff => "Note-Off",
            TokenType::Tempo => "Tempo",
            TokenType::TimeSig => "TimeSig",
            TokenType::Rest => "Rest",
            TokenType::Bar => "Bar",
            TokenType::Position => "Position",
            TokenType::Family => "Family",
            TokenType::Ignore => "Ignore",
            TokenType::Pad => "PAD",
            TokenType::Sos => "SOS",
            TokenType::Eos => "EOS",
            TokenType::Mask => "MASK",
        }
    }

    pub fn is_special(self) -> bool {
        Self::SPECIALS.contains(&self)
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An event string that does not name a known token type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed event '{0}'")]
pub struct ParseEventError(pub String);

impl FromStr for TokenType {
    type Err = ParseEventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "Pitch" => TokenType::Pitch,
            "Velocity" => TokenType::Velocity,
            "Duration" => TokenType::Duration,
            "Time-Shift" => TokenType::TimeShift,
            "Note-On" => TokenType::NoteOn,
            "Note-Off" => TokenType::NoteOff,
            "Tempo" => TokenType::Tempo,
            "TimeSig" => TokenType::TimeSig,
            "Rest" => TokenType::Rest,
            "Bar" => TokenType::Bar,
            "Position" => TokenType::Position,
            "Family" => TokenType::Family,
            "Ignore" => TokenType::Ignore,
            "PAD" => TokenType::Pad,
            "SOS" => TokenType::Sos,
            "EOS" => TokenType::Eos,
            "MASK" => TokenType::Mask,
            _ => return Err(ParseEventError(s.to_string())),
        })
    }
}

/// A symbolic unit before it is mapped to an integer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Event {
    pub ty: TokenType,
    pub value: String,
}

impl Event {
    pub fn new(ty: TokenType, value: impl ToString) -> Self {
        Event {
            ty,
            value: value.to_string(),
        }
    }

    /// An event with no value (`Bar_None`, `PAD_None`, ...).
    pub fn marker(ty: TokenType) -> Self {
        Event::new(ty, "None")
    }

    /// Parse the value string, `None` when it does not parse as `T`.
    pub fn parse_value<T: FromStr>(&self) -> Option<T> {
        self.value.parse().ok()
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.ty, self.value)
    }
}

impl FromStr for Event {
    type Err = ParseEventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ty, value) = s
            .split_once('_')
            .ok_or_else(|| ParseEventError(s.to_string()))?;
        Ok(Event {
            ty: ty.parse().map_err(|_| ParseEventError(s.to_string()))?,
            value: value.to_string(),
        })
    }
}

/// Dense, ordered index of the events of one token stream.
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    event_to_token: HashMap<String, u32>,
    events: Vec<Event>,
}

impl Vocabulary {
    /// An empty vocabulary, with `PAD_None` at index 0 when `pad` is set.
    pub fn new(pad: bool) -> Self {
        let mut vocab = Vocabulary::default();
        if pad {
            vocab.add_event(Event::marker(TokenType::Pad));
        }
        vocab
    }

    /// Append an event and return its token. Adding an event that is
    /// already present returns its existing token.
    pub fn add_event(&mut self, event: Event) -> u32 {
        let key = event.to_string();
        if let Some(&token) = self.event_to_token.get(&key) {
            return token;
        }
        let token = self.events.len() as u32;
        self.event_to_token.insert(key, token);
        self.events.push(event);
        token
    }

    pub fn add_events(&mut self, events: impl IntoIterator<Item = Event>) {
        for event in events {
            self.add_event(event);
        }
    }

    /// Append `SOS_None` and `EOS_None`.
    pub fn add_sos_eos(&mut self) {
        self.add_event(Event::marker(TokenType::Sos));
        self.add_event(Event::marker(TokenType::Eos));
    }

    pub fn add_mask(&mut self) {
        self.add_event(Event::marker(TokenType::Mask));
    }

    /// Token of an event string such as `"Pitch_60"`.
    pub fn event_to_token(&self, event: &str) -> Option<u32> {
        self.event_to_token.get(event).copied()
    }

    pub fn token_of(&self, event: &Event) -> Option<u32> {
        self.event_to_token(&event.to_string())
    }

    pub fn token_to_event(&self, token: u32) -> Option<&Event> {
        self.events.get(token as usize)
    }

    pub fn token_type(&self, token: u32) -> Option<TokenType> {
        self.token_to_event(token).map(|e| e.ty)
    }

    /// Every token whose event has type `ty`, ascending.
    pub fn tokens_of_type(&self, ty: TokenType) -> Vec<u32> {
        self.events
            .iter()
            .enumerate()
            .filter(|(_, e)| e.ty == ty)
            .map(|(i, _)| i as u32)
            .collect()
    }

    /// Events in token order.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl PartialEq for Vocabulary {
    fn eq(&self, other: &Self) -> bool {
        self.events == other.events
    }
}

impl Eq for Vocabulary {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_string_roundtrip() {
        for s in [
            "Pitch_60",
            "Duration_1.0.8",
            "Time-Shift_0.4.8",
            "TimeSig_3/4",
            "PAD_None",
            "Note-Off_72",
        ] {
            let event: Event = s.parse().unwrap();
            assert_eq!(event.to_string(), s);
        }
    }

    #[test]
    fn malformed_events_fail_to_parse() {
        assert!("Pitch60".parse::<Event>().is_err());
        assert!("Chord_Maj".parse::<Event>().is_err());
    }

    #[test]
    fn pad_takes_index_zero() {
        let mut vocab = Vocabulary::new(true);
        let pitch = vocab.add_event(Event::new(TokenType::Pitch, 60));
        assert_eq!(vocab.event_to_token("PAD_None"), Some(0));
        assert_eq!(pitch, 1);
        assert_eq!(vocab.token_type(0), Some(TokenType::Pad));
    }

    #[test]
    fn adding_twice_keeps_first_index() {
        let mut vocab = Vocabulary::new(false);
        assert_eq!(vocab.add_event(Event::new(TokenType::Pitch, 60)), 0);
        assert_eq!(vocab.add_event(Event::new(TokenType::Pitch, 61)), 1);
        assert_eq!(vocab.add_event(Event::new(TokenType::Pitch, 60)), 0);
        assert_eq!(vocab.len(), 2);
    }

    #[test]
    fn lookups_by_index_and_type() {
        let mut vocab = Vocabulary::new(true);
        vocab.add_events((60..63).map(|p| Event::new(TokenType::Pitch, p)));
        vocab.add_event(Event::marker(TokenType::Bar));
        vocab.add_sos_eos();
        vocab.add_mask();
        assert_eq!(vocab.tokens_of_type(TokenType::Pitch), vec![1, 2, 3]);
        assert_eq!(vocab.token_to_event(4).unwrap().to_string(), "Bar_None");
        assert_eq!(vocab.token_type(7), Some(TokenType::Mask));
        assert_eq!(vocab.token_type(8), None);
        assert_eq!(vocab.event_to_token("EOS_None"), Some(6));
    }

    #[test]
    fn parse_value_reports_bad_values() {
        let event = Event::new(TokenType::Pitch, "abc");
        assert_eq!(event.parse_value::<u8>(), None);
        assert_eq!(Event::new(TokenType::Pitch, 61).parse_value::<u8>(), Some(61));
    }
}
