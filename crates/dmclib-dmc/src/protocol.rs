//! Wire protocol for DMC/RIO controllers: byte classification, command
//! framing, reply decoding, and telemetry record header hunting.
//!
//! One byte stream carries three interleaved grammars:
//!
//! - **Command replies**: plain ASCII text, one terminator per
//!   sub-command (`:` = accepted, `?` = refused). A command line may
//!   contain several sub-commands joined by `;`, and the controller
//!   answers with one terminator per sub-command, in issue order.
//! - **Telemetry records**: fixed-length binary blocks. The 4-byte
//!   header carries the total record length in bytes 2..4
//!   (little-endian), which is the only thing that marks a record
//!   start; the stream is resynchronized by hunting for two
//!   consecutive bytes that spell the expected length.
//! - **Unsolicited messages**: text injected by controller programs at
//!   arbitrary byte positions, marked by the high bit being set on
//!   every byte. A high-bit byte only counts as unsolicited when its
//!   low seven bits are printable text; raw record bytes with the high
//!   bit set fail that test and stay in their channel.
//!
//! Everything in this module is pure and synchronous. The acquisition
//! loop feeds bytes in; nothing here performs I/O.

use bytes::{BufMut, BytesMut};

use dmclib_core::error::{Error, Result};

// ---------------------------------------------------------------------------
// Byte classification
// ---------------------------------------------------------------------------

/// Returns `true` if `b` is printable marked-output text: a letter,
/// digit, whitespace, or punctuation character.
///
/// This is the diversion rule. Controller programs can print any
/// printable character (`MG` of a negative number emits `-`), so the
/// set must cover all of ASCII punctuation, not just message syntax.
/// Validation of a complete message run is a separate, narrower check
/// in the unsolicited decoder.
pub fn is_printable_text(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b.is_ascii_whitespace() || b.is_ascii_punctuation()
}

/// Returns `true` if `b` is an unsolicited-message byte: high bit set
/// and the low seven bits printable.
///
/// Both conditions are required. A telemetry byte such as `0xE7`
/// (low bits `0x67` = `'g'`) does pass; see the acquisition loop for
/// why that cannot corrupt a record body.
pub fn is_unsolicited_byte(b: u8) -> bool {
    b & 0x80 == 0x80 && is_printable_text(b & 0x7F)
}

// ---------------------------------------------------------------------------
// Command encoding
// ---------------------------------------------------------------------------

/// Encode a command line for transmission: the text plus a CR.
pub fn encode_command(cmd: &str) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(cmd.len() + 1);
    buf.put_slice(cmd.as_bytes());
    buf.put_u8(b'\r');
    buf.to_vec()
}

/// Number of terminator bytes the controller will send in reply to a
/// command line: one per `;`-separated sub-command.
pub fn expected_terminators(cmd: &str) -> usize {
    cmd.bytes().filter(|&b| b == b';').count() + 1
}

// ---------------------------------------------------------------------------
// Exchange decoding
// ---------------------------------------------------------------------------

/// Incremental decoder for one synchronous command exchange.
///
/// Push reply bytes one at a time; the decoder counts terminators,
/// collects reply text per sub-command, and diverts unsolicited bytes
/// into their own buffer. The exchange is complete when the terminator
/// count reaches the expected number; a `?` terminator marks the whole
/// exchange rejected but never stops the count, so the stream stays in
/// sync even on failure.
#[derive(Debug)]
pub struct ExchangeDecoder {
    expected: usize,
    found: usize,
    rejected: bool,
    current: Vec<u8>,
    segments: Vec<String>,
    unsolicited: Vec<u8>,
}

impl ExchangeDecoder {
    /// Start decoding the reply to `cmd`.
    pub fn new(cmd: &str) -> Self {
        ExchangeDecoder {
            expected: expected_terminators(cmd),
            found: 0,
            rejected: false,
            current: Vec::new(),
            segments: Vec::new(),
            unsolicited: Vec::new(),
        }
    }

    /// Feed one reply byte. Returns `true` once the exchange is
    /// complete (all expected terminators seen).
    pub fn push(&mut self, b: u8) -> bool {
        if self.is_complete() {
            return true;
        }
        // Covers the message's own high-bit-marked `:` terminator,
        // which must not count against the exchange terminator total.
        if is_unsolicited_byte(b) {
            self.unsolicited.push(b);
            return false;
        }
        match b {
            b':' | b'?' => {
                if b == b'?' {
                    self.rejected = true;
                }
                self.found += 1;
                let text = String::from_utf8_lossy(&self.current).trim().to_string();
                self.segments.push(text);
                self.current.clear();
            }
            _ => self.current.push(b),
        }
        self.is_complete()
    }

    /// Whether all expected terminators have been received.
    pub fn is_complete(&self) -> bool {
        self.found >= self.expected
    }

    /// Unsolicited bytes diverted so far, draining the internal buffer.
    pub fn take_unsolicited(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.unsolicited)
    }

    /// Finish the exchange and produce the reply text.
    ///
    /// Sub-command replies are joined with a single space, in issue
    /// order, with terminators and CR/LF stripped. Any `?` terminator
    /// anywhere in the reply turns the whole exchange into
    /// [`Error::CommandRejected`].
    pub fn finish(self) -> Result<String> {
        if !self.is_complete() {
            return Err(Error::Desync(format!(
                "exchange ended after {} of {} terminators",
                self.found, self.expected
            )));
        }
        if self.rejected {
            return Err(Error::CommandRejected);
        }
        let mut out = String::new();
        for segment in &self.segments {
            let cleaned: String = segment
                .chars()
                .filter(|&c| c != '\r' && c != '\n' && c != ':')
                .collect();
            let cleaned = cleaned.trim();
            if !cleaned.is_empty() {
                if !out.is_empty() {
                    out.push(' ');
                }
                out.push_str(cleaned);
            }
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Telemetry record header hunting
// ---------------------------------------------------------------------------

/// What to do with one stream byte while hunting for a record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemuxStep {
    /// The byte belongs to an unsolicited message; divert it.
    Unsolicited,
    /// The byte did not complete a header; discard it and keep hunting.
    Hunting,
    /// The byte completed the length pair. The caller should now
    /// block-read the remaining `body_len` bytes of the record.
    HeaderFound {
        /// Bytes remaining after the 4-byte header.
        body_len: usize,
    },
}

/// Header-hunting state machine for telemetry records.
///
/// Records are not self-delimiting beyond their length field, so after
/// any desync the stream is recovered by examining bytes pairwise until
/// two consecutive bytes spell the expected record length
/// little-endian. Unsolicited bytes are classified out before the pair
/// check so a message arriving mid-hunt cannot shift the alignment.
#[derive(Debug)]
pub struct Demux {
    record_size: usize,
    prev: Option<u8>,
    /// Last two non-unsolicited bytes before the length pair, kept so
    /// the reassembled record carries its real header bytes.
    history: [u8; 2],
}

impl Demux {
    /// Create a hunter for records of `record_size` total bytes.
    pub fn new(record_size: usize) -> Self {
        Demux {
            record_size,
            prev: None,
            history: [0; 2],
        }
    }

    /// The total record size this hunter matches against.
    pub fn record_size(&self) -> usize {
        self.record_size
    }

    /// Feed one stream byte.
    pub fn push(&mut self, b: u8) -> DemuxStep {
        if is_unsolicited_byte(b) {
            return DemuxStep::Unsolicited;
        }
        if let Some(prev) = self.prev {
            let check = prev as usize | (b as usize) << 8;
            if check == self.record_size {
                self.prev = None;
                return DemuxStep::HeaderFound {
                    body_len: self.record_size - 4,
                };
            }
        }
        if let Some(prev) = self.prev {
            self.history[0] = self.history[1];
            self.history[1] = prev;
        }
        self.prev = Some(b);
        DemuxStep::Hunting
    }

    /// Reconstruct the 4-byte record header after [`DemuxStep::HeaderFound`]:
    /// the two bytes that preceded the length pair, then the length pair.
    pub fn header(&self) -> [u8; 4] {
        [
            self.history[0],
            self.history[1],
            (self.record_size & 0xFF) as u8,
            (self.record_size >> 8) as u8,
        ]
    }

    /// Forget any partial match, e.g. after a read timeout.
    pub fn reset(&mut self) {
        self.prev = None;
        self.history = [0; 2];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ----- byte classification -----

    #[test]
    fn test_printable_text_accepts_full_printable_set() {
        // Punctuation is printable: a program MG of a negative number
        // emits '-', and ':' arrives marked as a message terminator.
        for b in b"HomedA 1\r\nstop3.5 -:;?!,".iter() {
            assert!(is_printable_text(*b), "{b:#04x} should be printable");
        }
    }

    #[test]
    fn test_printable_text_rejects_control_bytes() {
        for b in [0x00, 0x07, 0x1B, 0x7F] {
            assert!(!is_printable_text(b), "{b:#04x} should not be printable");
        }
    }

    #[test]
    fn test_unsolicited_requires_high_bit() {
        // 'h' without the high bit is ordinary reply text.
        assert!(!is_unsolicited_byte(b'h'));
        assert!(is_unsolicited_byte(b'h' | 0x80));
    }

    #[test]
    fn test_unsolicited_requires_printable_low_bits() {
        // 0x87 -> low bits 0x07 = BEL, not printable.
        assert!(!is_unsolicited_byte(0x87));
        // 0xFF -> low bits 0x7F = DEL, not printable.
        assert!(!is_unsolicited_byte(0xFF));
        // 0xAD -> low bits 0x2D = '-', printable punctuation.
        assert!(is_unsolicited_byte(0xAD));
        // 0xA0 -> low bits 0x20 = ' ', printable.
        assert!(is_unsolicited_byte(0xA0));
    }

    // ----- command encoding -----

    #[test]
    fn test_encode_command_appends_cr() {
        assert_eq!(encode_command("MG TIME"), b"MG TIME\r");
    }

    #[test]
    fn test_expected_terminators_single() {
        assert_eq!(expected_terminators("MG TIME"), 1);
    }

    #[test]
    fn test_expected_terminators_multi() {
        assert_eq!(expected_terminators("MG 1;MG 2"), 2);
        assert_eq!(expected_terminators("ST;MO;SH A"), 3);
    }

    // ----- exchange decoding -----

    fn run_exchange(cmd: &str, reply: &[u8]) -> Result<String> {
        let mut dec = ExchangeDecoder::new(cmd);
        for &b in reply {
            if dec.push(b) {
                break;
            }
        }
        dec.finish()
    }

    #[test]
    fn test_exchange_single_command() {
        let resp = run_exchange("MG TIME", b"1234.0000\r\n:").unwrap();
        assert_eq!(resp, "1234.0000");
    }

    #[test]
    fn test_exchange_bare_ack() {
        let resp = run_exchange("SH A", b":").unwrap();
        assert_eq!(resp, "");
    }

    #[test]
    fn test_exchange_multi_command_joined_in_order() {
        let resp = run_exchange("MG 1;MG 2", b"1:2:").unwrap();
        assert_eq!(resp, "1 2");
    }

    #[test]
    fn test_exchange_multi_command_with_crlf() {
        let resp = run_exchange("MG 1;MG 2", b"1.0000\r\n:2.0000\r\n:").unwrap();
        assert_eq!(resp, "1.0000 2.0000");
    }

    #[test]
    fn test_exchange_rejected_first_subcommand() {
        let err = run_exchange("XX;MG 2", b"?2:").unwrap_err();
        assert!(matches!(err, Error::CommandRejected));
    }

    #[test]
    fn test_exchange_rejected_keeps_counting() {
        // The ? must not stop terminator counting: both terminators
        // are consumed before the decoder reports completion.
        let mut dec = ExchangeDecoder::new("MG 1;XX");
        assert!(!dec.push(b'1'));
        assert!(!dec.push(b':'));
        assert!(!dec.is_complete());
        assert!(dec.push(b'?'));
        assert!(dec.is_complete());
        assert!(matches!(dec.finish(), Err(Error::CommandRejected)));
    }

    #[test]
    fn test_exchange_complete_ignores_extra_bytes() {
        let mut dec = ExchangeDecoder::new("MG 1");
        dec.push(b'1');
        assert!(dec.push(b':'));
        // Bytes after completion are not consumed.
        assert!(dec.push(b'9'));
        assert_eq!(dec.finish().unwrap(), "1");
    }

    #[test]
    fn test_exchange_diverts_unsolicited() {
        let mut dec = ExchangeDecoder::new("MG 1");
        // "hA 1\r" with high bits set, spliced mid-reply.
        for &b in b"12".iter() {
            dec.push(b);
        }
        for &b in b"hA 1\r".iter() {
            dec.push(b | 0x80);
        }
        dec.push(b'3');
        assert!(dec.push(b':'));
        let mesg = dec.take_unsolicited();
        assert_eq!(mesg, b"hA 1\r".iter().map(|b| b | 0x80).collect::<Vec<_>>());
        assert_eq!(dec.finish().unwrap(), "123");
    }

    #[test]
    fn test_exchange_diverts_marked_punctuation() {
        // A marked '-' arriving mid-reply must not land in the reply
        // text as a garbage byte.
        let mut dec = ExchangeDecoder::new("MG _TPA");
        for &b in b"30".iter() {
            dec.push(b);
        }
        dec.push(b'-' | 0x80);
        for &b in b"10".iter() {
            dec.push(b);
        }
        assert!(dec.push(b':'));
        assert_eq!(dec.take_unsolicited(), vec![b'-' | 0x80]);
        assert_eq!(dec.finish().unwrap(), "3010");
    }

    #[test]
    fn test_exchange_diverts_marked_colon() {
        let mut dec = ExchangeDecoder::new("MG 1");
        // A high-bit-marked `:` belongs to an unsolicited message and
        // must not count as an exchange terminator.
        assert!(!dec.push(b':' | 0x80));
        dec.push(b'1');
        assert!(dec.push(b':'));
        assert_eq!(dec.take_unsolicited(), vec![b':' | 0x80]);
        assert_eq!(dec.finish().unwrap(), "1");
    }

    #[test]
    fn test_exchange_incomplete_is_desync() {
        let mut dec = ExchangeDecoder::new("MG 1;MG 2");
        dec.push(b'1');
        dec.push(b':');
        let err = dec.finish().unwrap_err();
        assert!(matches!(err, Error::Desync(_)));
    }

    // ----- record header hunting -----

    #[test]
    fn test_demux_finds_header_immediately() {
        // Record size 362 = 0x016A, little-endian pair 0x6A 0x01.
        let mut demux = Demux::new(362);
        assert_eq!(demux.push(0x01), DemuxStep::Hunting);
        assert_eq!(demux.push(0x07), DemuxStep::Hunting);
        assert_eq!(demux.push(0x6A), DemuxStep::Hunting);
        assert_eq!(demux.push(0x01), DemuxStep::HeaderFound { body_len: 358 });
        assert_eq!(demux.header(), [0x01, 0x07, 0x6A, 0x01]);
    }

    #[test]
    fn test_demux_skips_leading_garbage() {
        let mut demux = Demux::new(362); // 0x016A
        for &b in &[0x55, 0x13, 0x02] {
            assert_eq!(demux.push(b), DemuxStep::Hunting);
        }
        assert_eq!(demux.push(0x6A), DemuxStep::Hunting);
        assert_eq!(demux.push(0x01), DemuxStep::HeaderFound { body_len: 358 });
    }

    #[test]
    fn test_demux_diverts_unsolicited_without_breaking_pair() {
        let mut demux = Demux::new(362);
        assert_eq!(demux.push(0x6A), DemuxStep::Hunting);
        // A high-bit text byte between the pair bytes must not reset
        // the pairwise match.
        assert_eq!(demux.push(b'h' | 0x80), DemuxStep::Unsolicited);
        assert_eq!(demux.push(0x01), DemuxStep::HeaderFound { body_len: 358 });
    }

    #[test]
    fn test_demux_diverts_marked_punctuation() {
        // Same diversion rule as the reply reader: a marked
        // punctuation byte leaves the header hunt untouched.
        let mut demux = Demux::new(362);
        assert_eq!(demux.push(0x6A), DemuxStep::Hunting);
        assert_eq!(demux.push(b'-' | 0x80), DemuxStep::Unsolicited);
        assert_eq!(demux.push(0x01), DemuxStep::HeaderFound { body_len: 358 });
    }

    #[test]
    fn test_demux_wrong_size_keeps_hunting() {
        let mut demux = Demux::new(362);
        assert_eq!(demux.push(0x62), DemuxStep::Hunting);
        assert_eq!(demux.push(0x00), DemuxStep::Hunting);
    }

    #[test]
    fn test_demux_reset_forgets_partial_match() {
        let mut demux = Demux::new(362);
        demux.push(0x6A);
        demux.reset();
        // 0x01 alone must not complete a header after reset.
        assert_eq!(demux.push(0x01), DemuxStep::Hunting);
    }

    #[test]
    fn test_demux_overlapping_pair_scan() {
        // The pair check slides one byte at a time: 0x00 0x6A 0x01
        // must match on the second pair.
        let mut demux = Demux::new(362);
        assert_eq!(demux.push(0x00), DemuxStep::Hunting);
        assert_eq!(demux.push(0x6A), DemuxStep::Hunting);
        assert_eq!(demux.push(0x01), DemuxStep::HeaderFound { body_len: 358 });
    }
}
