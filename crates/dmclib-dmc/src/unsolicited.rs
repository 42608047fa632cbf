//! Unsolicited message decoding.
//!
//! Controller programs can push text notifications at any time; the
//! controller marks every byte of such a message by setting its high
//! bit (`CW 1` at connect time). The demultiplexer diverts those bytes
//! into a per-read-cycle buffer, and this module turns one buffered run
//! into [`ControllerEvent`]s.
//!
//! A message is a sequence of `name value` token pairs separated by
//! whitespace, where the last character of each name is the axis
//! letter. The homing program on the controller emits `homed<axis> 1`
//! when the home position is found and `home<axis> 0` when the homing
//! sequence ends; everything else is application traffic and is
//! surfaced only as the generic [`ControllerEvent::Unsolicited`].

use tokio::sync::broadcast;
use tracing::{debug, warn};

use dmclib_core::events::ControllerEvent;
use dmclib_core::types::Axis;

/// Characters valid in `name value` message text: LF, CR, digits,
/// letters, space, or `.`.
///
/// Narrower than the diversion rule in [`crate::protocol`]: diversion
/// must catch every marked printable byte so none leak into a reply or
/// a header hunt, while delivery drops whole runs that do not look
/// like message text.
fn is_message_char(b: u8) -> bool {
    matches!(b, b'\n' | b'\r' | b'0'..=b'9' | b'A'..=b'Z' | b'a'..=b'z' | b' ' | b'.')
}

/// Strip the high-bit marking from a run of unsolicited bytes and
/// return the message text.
///
/// Returns `None` if any byte's low seven bits are not valid message
/// text; a run that fails the check is dropped whole rather than
/// risking a garbled event. `:` terminator bytes that leaked into the
/// run are removed.
pub fn decode_text(bytes: &[u8]) -> Option<String> {
    let mut text = String::with_capacity(bytes.len());
    for &b in bytes {
        let c = b & 0x7F;
        if !is_message_char(c) && c != b':' {
            return None;
        }
        if c != b':' {
            text.push(c as char);
        }
    }
    Some(text)
}

/// Parse message text into name/axis/value triples.
///
/// Tokens alternate name, value. The trailing character of a name is
/// the axis letter; a name whose trailing character is not `A`..`H`
/// yields `axis = None` with the name kept intact. Pairs with a
/// missing or non-numeric value are logged and skipped.
fn parse_pairs(text: &str) -> Vec<(String, Option<Axis>, f64)> {
    let mut pairs = Vec::new();
    let mut tokens = text.split([' ', '\r', '\n']).filter(|t| !t.is_empty());
    while let Some(name_token) = tokens.next() {
        let Some(value_token) = tokens.next() else {
            warn!(name = name_token, "unsolicited message missing value token");
            break;
        };
        let Ok(value) = value_token.parse::<f64>() else {
            warn!(
                name = name_token,
                value = value_token,
                "unsolicited message value is not numeric"
            );
            continue;
        };
        let mut chars = name_token.chars();
        let last = chars.next_back();
        match last.and_then(Axis::from_letter) {
            Some(axis) => pairs.push((chars.as_str().to_string(), Some(axis), value)),
            None => pairs.push((name_token.to_string(), None, value)),
        }
    }
    pairs
}

/// Decode one run of unsolicited bytes and publish the resulting
/// events.
///
/// Every well-formed pair is published as
/// [`ControllerEvent::Unsolicited`]; the homing messages additionally
/// raise their dedicated events. Never blocks and never touches the
/// transport; it runs on the acquisition read path.
pub fn process_unsolicited(bytes: &[u8], event_tx: &broadcast::Sender<ControllerEvent>) {
    if bytes.is_empty() {
        return;
    }
    let Some(text) = decode_text(bytes) else {
        warn!(len = bytes.len(), "dropping corrupt unsolicited message");
        return;
    };
    for (name, axis, value) in parse_pairs(&text) {
        debug!(name = %name, ?axis, value, "unsolicited message");
        if let Some(axis) = axis {
            if name == "homed" && value != 0.0 {
                let _ = event_tx.send(ControllerEvent::AxisHomed { axis });
            }
            if name == "home" {
                let _ = event_tx.send(ControllerEvent::HomingComplete { axis });
            }
        }
        let _ = event_tx.send(ControllerEvent::Unsolicited { name, axis, value });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mark(text: &str) -> Vec<u8> {
        text.bytes().map(|b| b | 0x80).collect()
    }

    fn drain(rx: &mut broadcast::Receiver<ControllerEvent>) -> Vec<ControllerEvent> {
        let mut events = Vec::new();
        while let Ok(e) = rx.try_recv() {
            events.push(e);
        }
        events
    }

    // ----- decode_text -----

    #[test]
    fn test_decode_text_strips_high_bit() {
        assert_eq!(decode_text(&mark("homedA 1")).unwrap(), "homedA 1");
    }

    #[test]
    fn test_decode_text_removes_colons() {
        assert_eq!(decode_text(&mark("homedA 1:")).unwrap(), "homedA 1");
    }

    #[test]
    fn test_decode_text_rejects_non_text() {
        // Low bits 0x01 are not message text.
        assert_eq!(decode_text(&[0x81]), None);
    }

    #[test]
    fn test_decode_text_rejects_punctuation_run() {
        // '-' passes the diversion rule but is not valid message text,
        // so the run is dropped whole at the delivery stage.
        assert_eq!(decode_text(&mark("limA -1")), None);
    }

    // ----- parse_pairs -----

    #[test]
    fn test_parse_single_pair() {
        let pairs = parse_pairs("homedA 1");
        assert_eq!(pairs, vec![("homed".to_string(), Some(Axis::A), 1.0)]);
    }

    #[test]
    fn test_parse_multiple_pairs() {
        let pairs = parse_pairs("homedA 1\r\nhomeB 0");
        assert_eq!(
            pairs,
            vec![
                ("homed".to_string(), Some(Axis::A), 1.0),
                ("home".to_string(), Some(Axis::B), 0.0),
            ]
        );
    }

    #[test]
    fn test_parse_no_axis_letter() {
        // '9' is not an axis letter, so the name is kept whole.
        let pairs = parse_pairs("limit9 3");
        assert_eq!(pairs, vec![("limit9".to_string(), None, 3.0)]);
    }

    #[test]
    fn test_parse_missing_value_skipped() {
        let pairs = parse_pairs("homedA");
        assert!(pairs.is_empty());
    }

    #[test]
    fn test_parse_non_numeric_value_skipped() {
        let pairs = parse_pairs("homedA xyz homeB 0");
        assert_eq!(pairs, vec![("home".to_string(), Some(Axis::B), 0.0)]);
    }

    // ----- process_unsolicited -----

    #[test]
    fn test_homed_emits_axis_homed() {
        let (tx, mut rx) = broadcast::channel(16);
        process_unsolicited(&mark("homedA 1"), &tx);
        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, ControllerEvent::AxisHomed { axis } if *axis == Axis::A)));
        assert!(events
            .iter()
            .any(|e| matches!(e, ControllerEvent::Unsolicited { name, .. } if name == "homed")));
    }

    #[test]
    fn test_homed_zero_does_not_emit_axis_homed() {
        let (tx, mut rx) = broadcast::channel(16);
        process_unsolicited(&mark("homedA 0"), &tx);
        let events = drain(&mut rx);
        assert!(!events
            .iter()
            .any(|e| matches!(e, ControllerEvent::AxisHomed { .. })));
        // The generic event still fires.
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_home_emits_homing_complete() {
        let (tx, mut rx) = broadcast::channel(16);
        process_unsolicited(&mark("homeC 0"), &tx);
        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, ControllerEvent::HomingComplete { axis } if *axis == Axis::from_letter('C').unwrap())));
    }

    #[test]
    fn test_application_message_generic_only() {
        let (tx, mut rx) = broadcast::channel(16);
        process_unsolicited(&mark("toolB 7"), &tx);
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        match &events[0] {
            ControllerEvent::Unsolicited { name, axis, value } => {
                assert_eq!(name, "tool");
                assert_eq!(*axis, Some(Axis::B));
                assert_eq!(*value, 7.0);
            }
            other => panic!("expected Unsolicited, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_run_is_silent() {
        let (tx, mut rx) = broadcast::channel(16);
        process_unsolicited(&[], &tx);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_corrupt_run_dropped_whole() {
        let (tx, mut rx) = broadcast::channel(16);
        let mut bytes = mark("homedA 1");
        bytes.push(0x81); // low bits 0x01, not text
        process_unsolicited(&bytes, &tx);
        assert!(rx.try_recv().is_err());
    }
}
