use std::collections::BTreeMap;
use std::time::Duration;

/// Lyric ready for display, with optional translation merged in per line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedLyric {
    pub metadata: LyricMetadata,
    pub lines: Vec<LyricLine>,
}

/// Metadata from ID tags of the original lyric
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LyricMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub offset: i64, // milliseconds, can be negative
}

/// A single line of lyrics with timing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LyricLine {
    pub time: Duration,
    pub text: String,
    /// Translation sharing this line's timestamp
    pub trans: Option<String>,
    /// Word-level timing for enhanced lyrics
    pub words: Option<Vec<LyricWord>>,
}

/// Word-level timing for enhanced `<mm:ss.xx>` lyrics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LyricWord {
    pub start_time: Duration,
    pub end_time: Option<Duration>,
    pub text: String,
}

struct RawLine {
    text: String,
    words: Option<Vec<LyricWord>>,
}

/// Parse a lyric and its optional translation into display lines.
///
/// Lines are keyed by their millisecond timestamp; a translation line is attached
/// to the original line with the same timestamp. Only timestamps that carry
/// original text produce a line.
#[must_use]
pub fn parse_lyric(raw: &str, translation: Option<&str>) -> ParsedLyric {
    let (metadata, originals) = parse_document(raw);
    let translations = translation
        .map(|t| parse_document(t).1)
        .unwrap_or_default();

    let lines = originals
        .into_iter()
        .filter(|(_, line)| !line.text.is_empty())
        .map(|(ms, line)| LyricLine {
            time: Duration::from_millis(ms),
            text: line.text,
            trans: translations
                .get(&ms)
                .map(|t| t.text.clone())
                .filter(|t| !t.is_empty()),
            words: line.words,
        })
        .collect();

    ParsedLyric { metadata, lines }
}

impl ParsedLyric {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Whether any line carries word-level timing
    #[must_use]
    pub fn is_word_timed(&self) -> bool {
        self.lines.iter().any(|l| l.words.is_some())
    }

    /// Whether any line carries a translation
    #[must_use]
    pub fn has_translation(&self) -> bool {
        self.lines.iter().any(|l| l.trans.is_some())
    }

    /// Find the current line index for a given playback position
    #[must_use]
    pub fn current_line_index(&self, position: Duration) -> Option<usize> {
        // lines are sorted, so the answer is one before the first line still ahead
        let ahead = self.lines.partition_point(|line| line.time <= position);
        ahead.checked_sub(1)
    }

    /// Find the current line for a given playback position
    #[must_use]
    pub fn current_line(&self, position: Duration) -> Option<&LyricLine> {
        self.current_line_index(position).map(|i| &self.lines[i])
    }

    /// Get lines around the current position for display
    #[must_use]
    pub fn visible_lines(&self, position: Duration, before: usize, after: usize) -> &[LyricLine] {
        if self.lines.is_empty() {
            return &[];
        }
        let current_idx = self.current_line_index(position).unwrap_or(0);
        let start = current_idx.saturating_sub(before);
        let end = (current_idx + after + 1).min(self.lines.len());
        &self.lines[start..end]
    }
}

fn parse_document(input: &str) -> (LyricMetadata, BTreeMap<u64, RawLine>) {
    let mut metadata = LyricMetadata::default();
    let mut stamped = Vec::new();

    for line in input.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some((tag, value)) = parse_id_tag(line) {
            match tag.to_lowercase().as_str() {
                "ti" => metadata.title = Some(value),
                "ar" => metadata.artist = Some(value),
                "al" => metadata.album = Some(value),
                "offset" => {
                    if let Ok(offset) = value.parse::<i64>() {
                        metadata.offset = offset;
                    }
                }
                _ => {}
            }
            continue;
        }

        if let Some(parsed) = parse_lyric_line(line) {
            stamped.extend(parsed);
        }
    }

    let mut by_time = BTreeMap::new();
    for (time, mut raw) in stamped {
        let time = apply_offset(time, metadata.offset);
        if let Some(words) = raw.words.as_mut() {
            for word in words {
                word.start_time = apply_offset(word.start_time, metadata.offset);
                word.end_time = word.end_time.map(|e| apply_offset(e, metadata.offset));
            }
        }
        let ms = u64::try_from(time.as_millis()).unwrap_or(u64::MAX);
        // Later lines at the same timestamp replace earlier ones, unless they are blank
        if !raw.text.is_empty() || !by_time.contains_key(&ms) {
            by_time.insert(ms, raw);
        }
    }

    (metadata, by_time)
}

/// Parse an ID tag like [ti:Title] or [ar:Artist]
fn parse_id_tag(line: &str) -> Option<(String, String)> {
    if !line.starts_with('[') {
        return None;
    }

    let end = line.find(']')?;
    let content = &line[1..end];
    let first_colon = content.find(':')?;
    let tag = &content[..first_colon];

    // A numeric tag is a timestamp, not an ID tag
    if tag.is_empty() || tag.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let value = content[first_colon + 1..].trim().to_string();
    Some((tag.to_string(), value))
}

/// Parse a lyric line like [00:12.34]Hello or [00:12.34][00:15.67]Same lyrics
fn parse_lyric_line(line: &str) -> Option<Vec<(Duration, RawLine)>> {
    let mut remaining = line;
    let mut timestamps = Vec::new();

    while remaining.starts_with('[') {
        let Some(end) = remaining.find(']') else {
            break;
        };
        let Some(time) = parse_timestamp(&remaining[1..end]) else {
            break;
        };
        timestamps.push(time);
        remaining = &remaining[end + 1..];
    }

    if timestamps.is_empty() {
        return None;
    }

    let body = remaining.trim();
    let words = parse_enhanced_words(body);
    let text = if words.is_some() {
        strip_word_tags(body)
    } else {
        body.to_string()
    };

    Some(
        timestamps
            .into_iter()
            .map(|time| {
                (
                    time,
                    RawLine {
                        text: text.clone(),
                        words: words.clone(),
                    },
                )
            })
            .collect(),
    )
}

/// Parse a timestamp like "00:12.34", "00:12:34", "00:12.345" or "00:12"
fn parse_timestamp(s: &str) -> Option<Duration> {
    let s = s.trim();
    let (minutes, rest) = s.split_once(':')?;
    let minutes: u64 = minutes.parse().ok()?;

    let (seconds, fraction) = match rest.find(['.', ':']) {
        Some(pos) => (&rest[..pos], Some(&rest[pos + 1..])),
        None => (rest, None),
    };
    let seconds: u64 = seconds.parse().ok()?;

    let millis = match fraction {
        Some(f) => fraction_to_millis(f)?,
        None => 0,
    };

    Some(Duration::from_millis(
        minutes * 60_000 + seconds * 1000 + millis,
    ))
}

/// "3" is 300ms, "34" is 340ms, "345" is 345ms; extra digits are ignored
fn fraction_to_millis(fraction: &str) -> Option<u64> {
    if fraction.is_empty() || !fraction.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let digits: String = fraction.chars().take(3).collect();
    let value: u64 = digits.parse().ok()?;
    Some(match digits.len() {
        1 => value * 100,
        2 => value * 10,
        _ => value,
    })
}

/// Parse enhanced format with word timing: `<mm:ss.xx> word1 <mm:ss.xx> word2 ...`
fn parse_enhanced_words(text: &str) -> Option<Vec<LyricWord>> {
    if !text.contains('<') {
        return None;
    }

    let mut words: Vec<LyricWord> = Vec::new();
    let mut remaining = text;

    while let Some(open) = remaining.find('<') {
        remaining = &remaining[open..];
        let Some(close) = remaining.find('>') else {
            break;
        };
        let stamp = parse_timestamp(&remaining[1..close]);
        remaining = &remaining[close + 1..];

        let Some(start_time) = stamp else {
            continue;
        };

        let word_end = remaining.find('<').unwrap_or(remaining.len());
        let word_text = remaining[..word_end].trim();
        if let Some(previous) = words.last_mut() {
            previous.end_time.get_or_insert(start_time);
        }
        if !word_text.is_empty() {
            words.push(LyricWord {
                start_time,
                end_time: None,
                text: word_text.to_string(),
            });
        }
        remaining = &remaining[word_end..];
    }

    if words.is_empty() {
        None
    } else {
        Some(words)
    }
}

fn strip_word_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut remaining = text;
    while let Some(open) = remaining.find('<') {
        out.push_str(&remaining[..open]);
        match remaining[open..].find('>') {
            Some(close) => remaining = &remaining[open + close + 1..],
            None => {
                remaining = &remaining[open..];
                break;
            }
        }
    }
    out.push_str(remaining);
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Apply a millisecond offset; a positive offset shows lyrics later
fn apply_offset(duration: Duration, offset_ms: i64) -> Duration {
    let delta = Duration::from_millis(offset_ms.unsigned_abs());
    if offset_ms >= 0 {
        duration + delta
    } else {
        duration.saturating_sub(delta)
    }
}
