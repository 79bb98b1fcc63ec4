//! Incremental server-sent-event framing.
//!
//! Bytes go in as they arrive off the wire; complete events come out.
//! `data:` lines are concatenated without a separator and a blank line
//! ends the event. `event:` names are kept but carry no meaning here.

use crate::error::{Error, Result};

/// Largest unterminated line or accumulated event data accepted by default.
pub const DEFAULT_MAX_EVENT_BYTES: usize = 16 * 1024 * 1024;

/// One framed event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Event {
    pub event: Option<String>,
    pub data: String,
}

#[derive(Debug)]
pub struct EventDecoder {
    buffer: Vec<u8>,
    /// Prefix of `buffer` already known to hold no newline.
    scanned: usize,
    pending: Event,
    max_bytes: usize,
}

impl Default for EventDecoder {
    fn default() -> Self {
        Self::with_limit(DEFAULT_MAX_EVENT_BYTES)
    }
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(max_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            pending: Event::default(),
            max_bytes,
        }
    }

    /// Feed a chunk, returning every event it completed. Fails once a line
    /// or an event grows past the limit.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Event>> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        let mut start = 0;
        let mut from = self.scanned;
        while let Some(pos) = self.buffer[from..].iter().position(|&b| b == b'\n') {
            let end = from + pos;
            let line = String::from_utf8_lossy(&self.buffer[start..end]).into_owned();
            start = end + 1;
            from = start;
            if let Some(event) = self.process_line(line.trim_end_matches('\r'))? {
                events.push(event);
            }
        }
        self.buffer.drain(..start);
        self.scanned = self.buffer.len();

        if self.buffer.len() > self.max_bytes {
            self.buffer.clear();
            self.scanned = 0;
            return Err(Error::EventTooLarge(self.max_bytes));
        }
        Ok(events)
    }

    /// Flush whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Result<Option<Event>> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            self.scanned = 0;
            let line = String::from_utf8_lossy(&rest).into_owned();
            if let Some(event) = self.process_line(line.trim_end_matches('\r'))? {
                return Ok(Some(event));
            }
        }
        Ok(self.take_pending())
    }

    fn process_line(&mut self, line: &str) -> Result<Option<Event>> {
        if line.is_empty() {
            return Ok(self.take_pending());
        }
        if line.starts_with(':') {
            return Ok(None);
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => {
                if self.pending.data.len() + value.len() > self.max_bytes {
                    self.pending = Event::default();
                    return Err(Error::EventTooLarge(self.max_bytes));
                }
                self.pending.data.push_str(value);
            }
            "event" => self.pending.event = Some(value.trim().to_string()),
            _ => {}
        }
        Ok(None)
    }

    fn take_pending(&mut self) -> Option<Event> {
        let event = std::mem::take(&mut self.pending);
        if event.data.is_empty() {
            None
        } else {
            Some(event)
        }
    }
}

/// Frame a complete body in one go.
pub fn parse_events(body: &str) -> Result<Vec<Event>> {
    let mut decoder = EventDecoder::new();
    let mut events = decoder.push(body.as_bytes())?;
    events.extend(decoder.finish()?);
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_event() {
        let events = parse_events("event: message\ndata: {\"id\":1}\n\n").unwrap();
        assert_eq!(
            events,
            vec![Event {
                event: Some("message".to_string()),
                data: "{\"id\":1}".to_string(),
            }]
        );
    }

    #[test]
    fn data_lines_concatenate() {
        let events = parse_events("data: {\"a\":\ndata: 1}\n\n").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{\"a\":1}");
    }

    #[test]
    fn split_across_chunks() {
        let mut decoder = EventDecoder::new();
        assert!(decoder.push(b"event: endpoint\nda").unwrap().is_empty());
        assert!(decoder.push(b"ta: /messages/?session").unwrap().is_empty());
        let events = decoder.push(b"_id=abc\n\n").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("endpoint"));
        assert_eq!(events[0].data, "/messages/?session_id=abc");
    }

    #[test]
    fn crlf_and_no_space() {
        let events = parse_events("data:first\r\n\r\ndata: second\r\n\r\n").unwrap();
        let data: Vec<&str> = events.iter().map(|e| e.data.as_str()).collect();
        assert_eq!(data, ["first", "second"]);
    }

    #[test]
    fn comments_and_empty_events_skipped() {
        let events = parse_events(": keep-alive\n\nevent: ping\n\nid: 4\ndata: x\n\n").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "x");
        assert_eq!(events[0].event, None);
    }

    #[test]
    fn finish_flushes_unterminated_event() {
        let mut decoder = EventDecoder::new();
        assert!(decoder.push(b"data: tail").unwrap().is_empty());
        assert_eq!(decoder.finish().unwrap().map(|e| e.data), Some("tail".to_string()));
        assert_eq!(decoder.finish().unwrap(), None);
    }

    #[test]
    fn multibyte_split_is_preserved() {
        let bytes = "data: héllo\n\n".as_bytes();
        let mut decoder = EventDecoder::new();
        let (a, b) = bytes.split_at(8);
        assert!(decoder.push(a).unwrap().is_empty());
        let events = decoder.push(b).unwrap();
        assert_eq!(events[0].data, "héllo");
    }

    #[test]
    fn long_line_is_refused() {
        let mut decoder = EventDecoder::with_limit(16);
        assert!(decoder.push(b"data: 0123456789").unwrap().is_empty());
        assert!(matches!(
            decoder.push(b"abcdef"),
            Err(Error::EventTooLarge(16))
        ));
    }

    #[test]
    fn oversized_event_across_lines_is_refused() {
        let mut decoder = EventDecoder::with_limit(16);
        assert!(decoder.push(b"data: 0123456789\n").unwrap().is_empty());
        assert!(matches!(
            decoder.push(b"data: 0123456789\n"),
            Err(Error::EventTooLarge(16))
        ));
    }

    #[test]
    fn many_small_chunks_frame_one_line() {
        let mut decoder = EventDecoder::new();
        for byte in b"data: abc" {
            assert!(decoder.push(&[*byte]).unwrap().is_empty());
        }
        let events = decoder.push(b"\n\n").unwrap();
        assert_eq!(events[0].data, "abc");
    }
}
