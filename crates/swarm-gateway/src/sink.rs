//! Streaming sinks and the thinking-marker splitter.
//!
//! A sink receives successive text deltas (plus the full accumulated
//! buffer) before the final message returns. The splitter separates
//! `[THINKING]…[/THINKING]` reasoning spans from answer text so UIs can
//! render the two channels differently; it tolerates unclosed markers
//! during streaming and collapses nested occurrences.

use tokio::sync::mpsc;

/// Observer of streamed model output.
pub trait StreamSink: Send + Sync {
    /// Called for every delta; `buffer` is the full text so far.
    fn on_delta(&self, delta: &str, buffer: &str);
}

/// Sink that discards everything.
pub struct NullSink;

impl StreamSink for NullSink {
    fn on_delta(&self, _delta: &str, _buffer: &str) {}
}

/// Sink that forwards deltas into an unbounded channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl StreamSink for ChannelSink {
    fn on_delta(&self, delta: &str, _buffer: &str) {
        // Receiver may be gone; streaming must not fail because of it.
        let _ = self.tx.send(delta.to_string());
    }
}

impl<F> StreamSink for F
where
    F: Fn(&str, &str) + Send + Sync,
{
    fn on_delta(&self, delta: &str, buffer: &str) {
        self(delta, buffer)
    }
}

const THINKING_OPEN: &str = "[THINKING]";
const THINKING_CLOSE: &str = "[/THINKING]";

/// A classified span of streamed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamSegment {
    Reasoning(String),
    Answer(String),
}

/// Incremental parser for marker-delimited reasoning.
#[derive(Debug, Default)]
pub struct ThinkingSplitter {
    pending: String,
    /// Nesting depth; reasoning while > 0. Nested opens collapse into one
    /// logical reasoning span.
    depth: usize,
}

impl ThinkingSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a delta, producing classified segments. Text that could still
    /// be the start of a marker is held back until disambiguated.
    pub fn feed(&mut self, delta: &str) -> Vec<StreamSegment> {
        self.pending.push_str(delta);
        let mut segments = Vec::new();

        loop {
            let marker = if self.depth == 0 {
                THINKING_OPEN
            } else {
                THINKING_CLOSE
            };

            match self.pending.find(marker) {
                Some(index) => {
                    let before: String = self.pending.drain(..index).collect();
                    self.pending.drain(..marker.len());
                    self.emit(&mut segments, before);
                    if self.depth == 0 {
                        self.depth = 1;
                    } else {
                        self.depth -= 1;
                    }
                    // Nested opens inside reasoning are swallowed.
                    while self.depth > 0 {
                        if let Some(open) = self.pending.find(THINKING_OPEN) {
                            let close = self.pending.find(THINKING_CLOSE);
                            if close.map(|c| open < c).unwrap_or(true) {
                                self.pending
                                    .replace_range(open..open + THINKING_OPEN.len(), "");
                                continue;
                            }
                        }
                        break;
                    }
                }
                None => {
                    let keep = Self::partial_marker_suffix(&self.pending, marker);
                    let flush_len = self.pending.len() - keep;
                    let flushed: String = self.pending.drain(..flush_len).collect();
                    self.emit(&mut segments, flushed);
                    break;
                }
            }
        }
        segments
    }

    /// Flush whatever remains, treating an unclosed reasoning span as
    /// reasoning (progressive rendering).
    pub fn finish(&mut self) -> Vec<StreamSegment> {
        let mut segments = Vec::new();
        let rest = std::mem::take(&mut self.pending);
        self.emit(&mut segments, rest);
        self.depth = 0;
        segments
    }

    fn emit(&self, segments: &mut Vec<StreamSegment>, text: String) {
        if text.is_empty() {
            return;
        }
        let reasoning = self.depth > 0;
        let merged = match segments.last_mut() {
            Some(StreamSegment::Reasoning(acc)) if reasoning => {
                acc.push_str(&text);
                true
            }
            Some(StreamSegment::Answer(acc)) if !reasoning => {
                acc.push_str(&text);
                true
            }
            _ => false,
        };
        if !merged {
            segments.push(if reasoning {
                StreamSegment::Reasoning(text)
            } else {
                StreamSegment::Answer(text)
            });
        }
    }

    /// Length of the longest suffix of `text` that is a proper prefix of
    /// `marker` (a marker possibly split across deltas).
    fn partial_marker_suffix(text: &str, marker: &str) -> usize {
        let max = marker.len().saturating_sub(1).min(text.len());
        for len in (1..=max).rev() {
            if !text.is_char_boundary(text.len() - len) {
                continue;
            }
            if marker.starts_with(&text[text.len() - len..]) {
                return len;
            }
        }
        0
    }
}

/// Strip all thinking markers and their content from complete text.
pub fn strip_thinking(text: &str) -> String {
    let mut splitter = ThinkingSplitter::new();
    let mut segments = splitter.feed(text);
    segments.extend(splitter.finish());
    segments
        .into_iter()
        .filter_map(|segment| match segment {
            StreamSegment::Answer(t) => Some(t),
            StreamSegment::Reasoning(_) => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(deltas: &[&str]) -> Vec<StreamSegment> {
        let mut splitter = ThinkingSplitter::new();
        let mut all = Vec::new();
        for delta in deltas {
            for segment in splitter.feed(delta) {
                merge(&mut all, segment);
            }
        }
        for segment in splitter.finish() {
            merge(&mut all, segment);
        }
        all
    }

    fn merge(all: &mut Vec<StreamSegment>, segment: StreamSegment) {
        let merged = match (all.last_mut(), &segment) {
            (Some(StreamSegment::Reasoning(acc)), StreamSegment::Reasoning(t)) => {
                acc.push_str(t);
                true
            }
            (Some(StreamSegment::Answer(acc)), StreamSegment::Answer(t)) => {
                acc.push_str(t);
                true
            }
            _ => false,
        };
        if !merged {
            all.push(segment);
        }
    }

    #[test]
    fn test_plain_text_is_answer() {
        let segments = collect(&["hello ", "world"]);
        assert_eq!(segments, vec![StreamSegment::Answer("hello world".into())]);
    }

    #[test]
    fn test_marker_pair_splits_channels() {
        let segments = collect(&["[THINKING]let me think[/THINKING]the answer"]);
        assert_eq!(
            segments,
            vec![
                StreamSegment::Reasoning("let me think".into()),
                StreamSegment::Answer("the answer".into()),
            ]
        );
    }

    #[test]
    fn test_marker_split_across_deltas() {
        let segments = collect(&["[THIN", "KING]a[/THINK", "ING]b"]);
        assert_eq!(
            segments,
            vec![
                StreamSegment::Reasoning("a".into()),
                StreamSegment::Answer("b".into()),
            ]
        );
    }

    #[test]
    fn test_unclosed_marker_renders_progressively() {
        let segments = collect(&["[THINKING]still going"]);
        assert_eq!(
            segments,
            vec![StreamSegment::Reasoning("still going".into())]
        );
    }

    #[test]
    fn test_nested_markers_collapse() {
        // The nested open is swallowed; the single close ends the span.
        let segments = collect(&["[THINKING]outer [THINKING]inner[/THINKING] done"]);
        assert_eq!(
            segments,
            vec![
                StreamSegment::Reasoning("outer inner".into()),
                StreamSegment::Answer(" done".into()),
            ]
        );
    }

    #[test]
    fn test_strip_thinking() {
        assert_eq!(
            strip_thinking("[THINKING]reasoning[/THINKING]answer"),
            "answer"
        );
        assert_eq!(strip_thinking("no markers"), "no markers");
    }

    #[test]
    fn test_channel_sink_forwards() {
        let (sink, mut rx) = ChannelSink::new();
        sink.on_delta("a", "a");
        sink.on_delta("b", "ab");
        assert_eq!(rx.try_recv().unwrap(), "a");
        assert_eq!(rx.try_recv().unwrap(), "b");
    }
}
