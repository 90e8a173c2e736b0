//! Line-oriented control surface read from stdin.

use deckmusic_core::{PlayMode, PreferredQuality, Track};
use std::path::PathBuf;
use std::time::Duration;

pub const HELP: &str = "\
Commands:
  load <file.json>        replace the queue with a JSON array of tracks and play it
  play <mid> [name]       play a single track now
  add <mid> [name]        append a track to the queue
  at <index>              jump to a queue position
  rm <index>              remove a queued track
  next | prev             move through the queue
  toggle                  pause or resume
  stop                    stop and unload the current stream
  clear                   empty the queue
  mode [order|single|shuffle]   set or cycle the play mode
  vol <0.0-1.0>           set the volume
  quality <auto|high|balanced|compat>
  seek <seconds>
  provider <id>           switch the active provider
  status                  print the current state
  reset                   forget the queue and all settings
  quit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Load(PathBuf),
    Play(Track),
    Add(Track),
    PlayAt(usize),
    Remove(usize),
    Next,
    Prev,
    Toggle,
    Stop,
    Clear,
    /// `None` cycles to the following mode
    Mode(Option<PlayMode>),
    Volume(f32),
    Quality(PreferredQuality),
    Seek(Duration),
    Provider(String),
    Status,
    Reset,
    Help,
    Quit,
}

impl std::str::FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (verb, rest) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(verb, rest)| (verb, rest.trim()));

        match verb.to_ascii_lowercase().as_str() {
            "load" => required(rest, "load").map(|p| Self::Load(PathBuf::from(p))),
            "play" => track_arg(rest, "play").map(Self::Play),
            "add" => track_arg(rest, "add").map(Self::Add),
            "at" => index_arg(rest, "at").map(Self::PlayAt),
            "rm" | "remove" => index_arg(rest, "rm").map(Self::Remove),
            "next" | "n" => Ok(Self::Next),
            "prev" | "p" => Ok(Self::Prev),
            "toggle" | "pause" | "resume" => Ok(Self::Toggle),
            "stop" => Ok(Self::Stop),
            "clear" => Ok(Self::Clear),
            "mode" if rest.is_empty() => Ok(Self::Mode(None)),
            "mode" => rest.parse().map(|m| Self::Mode(Some(m))),
            "vol" | "volume" => {
                let volume: f32 = required(rest, "vol")?
                    .parse()
                    .map_err(|_| format!("not a volume: {rest}"))?;
                if volume.is_finite() {
                    Ok(Self::Volume(volume))
                } else {
                    Err(format!("not a volume: {rest}"))
                }
            }
            "quality" => required(rest, "quality")?.parse().map(Self::Quality),
            "seek" => {
                let secs: f64 = required(rest, "seek")?
                    .parse()
                    .map_err(|_| format!("not a position: {rest}"))?;
                Duration::try_from_secs_f64(secs)
                    .map(Self::Seek)
                    .map_err(|_| format!("not a position: {rest}"))
            }
            "provider" => required(rest, "provider").map(|id| Self::Provider(id.to_string())),
            "status" | "s" => Ok(Self::Status),
            "reset" => Ok(Self::Reset),
            "help" | "?" => Ok(Self::Help),
            "quit" | "exit" | "q" => Ok(Self::Quit),
            "" => Err("empty command".to_string()),
            other => Err(format!("unknown command: {other} (try `help`)")),
        }
    }
}

fn required<'a>(rest: &'a str, verb: &str) -> Result<&'a str, String> {
    if rest.is_empty() {
        Err(format!("`{verb}` needs an argument"))
    } else {
        Ok(rest)
    }
}

fn index_arg(rest: &str, verb: &str) -> Result<usize, String> {
    required(rest, verb)?
        .parse()
        .map_err(|_| format!("not a queue position: {rest}"))
}

fn track_arg(rest: &str, verb: &str) -> Result<Track, String> {
    let rest = required(rest, verb)?;
    let (mid, name) = rest
        .split_once(char::is_whitespace)
        .map_or((rest, rest), |(mid, name)| (mid, name.trim()));
    Ok(Track {
        mid: mid.to_string(),
        name: name.to_string(),
        ..Track::default()
    })
}
