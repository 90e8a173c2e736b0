pub mod audio;
pub mod backend;
pub mod broadcast;
pub mod cache;
pub mod config;
pub mod controller;
pub mod error;
pub mod lyric;
pub mod model;
pub mod paths;
pub mod persistence;
pub mod settings;
pub mod shuffle;
pub mod store;
pub mod time;
pub mod timeline;

pub use audio::{AudioEvent, AudioEvents, AudioOutput, AudioSink, SinkFactory};
pub use backend::{
    LyricRequest, LyricResponse, MusicBackend, ProviderInfo, StreamUrlRequest, StreamUrlResponse,
};
pub use broadcast::{Listener, PlayerEvent, StateBroadcaster, Subscription};
pub use cache::{AssetCache, LyricLookup, StreamUrlLookup};
pub use config::{
    BackendConfig, CacheConfig, Config, LoggingConfig, PersistenceConfig, PlaybackConfig,
    SettingsSource,
};

/// Re-export toml error type for config parsing error handling
pub use toml::de::Error as TomlParseError;
pub use controller::{NeedMoreTracks, PlaybackController};
pub use error::{CoreError, PlaybackError, Result};
pub use lyric::{parse_lyric, LyricLine, LyricMetadata, LyricWord, ParsedLyric};
pub use model::{PlayMode, PlayerSnapshot, PreferredQuality, Track};
pub use paths::{
    config_dir, config_path, log_file_path, settings_path, CONFIG_DIR_NAME, CONFIG_FILE_NAME,
    LOG_FILE_NAME, SETTINGS_FILE_NAME,
};
pub use persistence::{PersistenceGateway, SaveScope};
pub use settings::{FrontendSettings, StoredQueueState};
pub use shuffle::ShuffleEngine;
pub use store::{JsonFileSettingsStore, SettingsStore};
pub use time::DurationExt;
pub use timeline::Timeline;
