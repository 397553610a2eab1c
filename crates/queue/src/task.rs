//! Structured encode settings.
//!
//! An [`EncodeTask`] holds every option the query codec understands as a typed
//! field. Enumerations carry their engine command-line names so the codec never
//! has to match on free-form strings.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Unit used to bound the start and end of an encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointToPointMode {
    #[default]
    Chapters,
    Seconds,
    Frames,
    /// `start_point` is the preview index, `end_point` the duration in seconds.
    Preview,
}

/// Output container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Mp4,
    Mkv,
    WebM,
}

impl OutputFormat {
    pub fn cli_name(self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "av_mp4",
            OutputFormat::Mkv => "av_mkv",
            OutputFormat::WebM => "av_webm",
        }
    }

    pub fn from_cli_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "av_mp4" | "mp4" | "m4v" => Some(OutputFormat::Mp4),
            "av_mkv" | "mkv" => Some(OutputFormat::Mkv),
            "av_webm" | "webm" => Some(OutputFormat::WebM),
            _ => None,
        }
    }
}

/// Anamorphic picture mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Anamorphic {
    #[default]
    None,
    Strict,
    Loose,
    Custom,
}

/// Pixels removed from each edge of the picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Cropping {
    pub top: u32,
    pub bottom: u32,
    pub left: u32,
    pub right: u32,
}

impl Cropping {
    pub fn new(top: u32, bottom: u32, left: u32, right: u32) -> Self {
        Self {
            top,
            bottom,
            left,
            right,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelAspect {
    pub x: u32,
    pub y: u32,
}

impl Default for PixelAspect {
    fn default() -> Self {
        Self { x: 1, y: 1 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decomb {
    #[default]
    Off,
    Default,
    Custom(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Deinterlace {
    #[default]
    Off,
    Fast,
    Slow,
    Slower,
    Slowest,
    Custom(String),
}

impl Deinterlace {
    /// Preset name as written after `--deinterlace=`.
    pub fn preset_name(&self) -> Option<&'static str> {
        match self {
            Deinterlace::Fast => Some("fast"),
            Deinterlace::Slow => Some("slow"),
            Deinterlace::Slower => Some("slower"),
            Deinterlace::Slowest => Some("slowest"),
            Deinterlace::Off | Deinterlace::Custom(_) => None,
        }
    }

    pub fn from_value(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "fast" => Deinterlace::Fast,
            "slow" => Deinterlace::Slow,
            "slower" => Deinterlace::Slower,
            "slowest" => Deinterlace::Slowest,
            _ => Deinterlace::Custom(value.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Denoise {
    #[default]
    Off,
    Weak,
    Medium,
    Strong,
    Custom(String),
}

impl Denoise {
    pub fn preset_name(&self) -> Option<&'static str> {
        match self {
            Denoise::Weak => Some("weak"),
            Denoise::Medium => Some("medium"),
            Denoise::Strong => Some("strong"),
            Denoise::Off | Denoise::Custom(_) => None,
        }
    }

    pub fn from_value(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "weak" => Denoise::Weak,
            "medium" => Denoise::Medium,
            "strong" => Denoise::Strong,
            _ => Denoise::Custom(value.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Detelecine {
    #[default]
    Off,
    Default,
    Custom(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoEncoder {
    #[default]
    X264,
    X265,
    Mpeg4,
    Mpeg2,
    Theora,
    Vp8,
}

impl VideoEncoder {
    pub fn cli_name(self) -> &'static str {
        match self {
            VideoEncoder::X264 => "x264",
            VideoEncoder::X265 => "x265",
            VideoEncoder::Mpeg4 => "mpeg4",
            VideoEncoder::Mpeg2 => "mpeg2",
            VideoEncoder::Theora => "theora",
            VideoEncoder::Vp8 => "VP8",
        }
    }

    /// Accepts current names and the older ffmpeg-prefixed aliases.
    pub fn from_cli_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "x264" => Some(VideoEncoder::X264),
            "x265" => Some(VideoEncoder::X265),
            "mpeg4" | "ffmpeg" | "ffmpeg4" => Some(VideoEncoder::Mpeg4),
            "mpeg2" | "ffmpeg2" => Some(VideoEncoder::Mpeg2),
            "theora" => Some(VideoEncoder::Theora),
            "vp8" => Some(VideoEncoder::Vp8),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FramerateMode {
    Cfr,
    #[default]
    Vfr,
    Pfr,
}

/// Video rate control. Holding the value inside the variant keeps bitrate
/// and quality mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value", rename_all = "snake_case")]
pub enum RateControl {
    /// Target bitrate in kbps.
    AverageBitrate(u32),
    /// Encoder quality value, passed through unscaled.
    ConstantQuality(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoEncodeRateType {
    AverageBitrate,
    ConstantQuality,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioEncoder {
    #[default]
    Aac,
    FdkAac,
    Mp3,
    Ac3,
    Vorbis,
    Flac16,
    Flac24,
    AacPassthru,
    Ac3Passthru,
    DtsPassthru,
    DtsHdPassthru,
    Mp3Passthru,
    Passthrough,
}

impl AudioEncoder {
    pub fn cli_name(self) -> &'static str {
        match self {
            AudioEncoder::Aac => "av_aac",
            AudioEncoder::FdkAac => "fdk_aac",
            AudioEncoder::Mp3 => "mp3",
            AudioEncoder::Ac3 => "ac3",
            AudioEncoder::Vorbis => "vorbis",
            AudioEncoder::Flac16 => "flac16",
            AudioEncoder::Flac24 => "flac24",
            AudioEncoder::AacPassthru => "copy:aac",
            AudioEncoder::Ac3Passthru => "copy:ac3",
            AudioEncoder::DtsPassthru => "copy:dts",
            AudioEncoder::DtsHdPassthru => "copy:dtshd",
            AudioEncoder::Mp3Passthru => "copy:mp3",
            AudioEncoder::Passthrough => "copy",
        }
    }

    pub fn from_cli_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "av_aac" | "aac" | "faac" | "ffaac" => Some(AudioEncoder::Aac),
            "fdk_aac" => Some(AudioEncoder::FdkAac),
            "mp3" | "lame" => Some(AudioEncoder::Mp3),
            "ac3" | "ffac3" => Some(AudioEncoder::Ac3),
            "vorbis" => Some(AudioEncoder::Vorbis),
            "flac16" | "flac" | "ffflac" => Some(AudioEncoder::Flac16),
            "flac24" | "ffflac24" => Some(AudioEncoder::Flac24),
            "copy:aac" => Some(AudioEncoder::AacPassthru),
            "copy:ac3" => Some(AudioEncoder::Ac3Passthru),
            "copy:dts" => Some(AudioEncoder::DtsPassthru),
            "copy:dtshd" => Some(AudioEncoder::DtsHdPassthru),
            "copy:mp3" => Some(AudioEncoder::Mp3Passthru),
            "copy" => Some(AudioEncoder::Passthrough),
            _ => None,
        }
    }

    /// Passthrough encoders copy the source stream, so bitrate and sample
    /// rate have no meaning for them.
    pub fn is_passthrough(self) -> bool {
        matches!(
            self,
            AudioEncoder::AacPassthru
                | AudioEncoder::Ac3Passthru
                | AudioEncoder::DtsPassthru
                | AudioEncoder::DtsHdPassthru
                | AudioEncoder::Mp3Passthru
                | AudioEncoder::Passthrough
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mixdown {
    None,
    Mono,
    LeftOnly,
    RightOnly,
    Stereo,
    DolbySurround,
    #[default]
    DolbyProLogicII,
    FivePointOne,
    SixPointOne,
    SevenPointOne,
    FiveTwoLfe,
}

impl Mixdown {
    pub fn cli_name(self) -> &'static str {
        match self {
            Mixdown::None => "none",
            Mixdown::Mono => "mono",
            Mixdown::LeftOnly => "left_only",
            Mixdown::RightOnly => "right_only",
            Mixdown::Stereo => "stereo",
            Mixdown::DolbySurround => "dpl1",
            Mixdown::DolbyProLogicII => "dpl2",
            Mixdown::FivePointOne => "5point1",
            Mixdown::SixPointOne => "6point1",
            Mixdown::SevenPointOne => "7point1",
            Mixdown::FiveTwoLfe => "5_2_lfe",
        }
    }

    pub fn from_cli_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "none" | "auto" => Some(Mixdown::None),
            "mono" => Some(Mixdown::Mono),
            "left_only" => Some(Mixdown::LeftOnly),
            "right_only" => Some(Mixdown::RightOnly),
            "stereo" => Some(Mixdown::Stereo),
            "dpl1" => Some(Mixdown::DolbySurround),
            "dpl2" => Some(Mixdown::DolbyProLogicII),
            "5point1" | "6ch" => Some(Mixdown::FivePointOne),
            "6point1" => Some(Mixdown::SixPointOne),
            "7point1" => Some(Mixdown::SevenPointOne),
            "5_2_lfe" => Some(Mixdown::FiveTwoLfe),
            _ => None,
        }
    }
}

/// One output audio track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioTrack {
    /// 1-based source track index.
    pub track: u32,
    pub encoder: AudioEncoder,
    pub mixdown: Mixdown,
    /// kHz; 0 means match the source.
    pub sample_rate: f64,
    /// kbps; 0 means the encoder default.
    pub bitrate: u32,
    pub drc: f64,
    /// dB
    pub gain: i32,
}

impl Default for AudioTrack {
    fn default() -> Self {
        Self {
            track: 1,
            encoder: AudioEncoder::default(),
            mixdown: Mixdown::default(),
            sample_rate: 0.0,
            bitrate: 160,
            drc: 0.0,
            gain: 0,
        }
    }
}

/// Which source codecs may be passed through untouched, and what to encode
/// to when a passthrough is not possible.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AllowedPassthru {
    pub aac: bool,
    pub ac3: bool,
    pub dts: bool,
    pub dtshd: bool,
    pub mp3: bool,
    pub fallback: Option<AudioEncoder>,
}

impl AllowedPassthru {
    /// Comma-joined copy mask, or `None` when nothing is allowed.
    pub fn copy_mask(&self) -> Option<String> {
        let names: Vec<&str> = [
            (self.aac, "aac"),
            (self.ac3, "ac3"),
            (self.dtshd, "dtshd"),
            (self.dts, "dts"),
            (self.mp3, "mp3"),
        ]
        .into_iter()
        .filter_map(|(allowed, name)| allowed.then_some(name))
        .collect();

        if names.is_empty() {
            None
        } else {
            Some(names.join(","))
        }
    }

    pub fn apply_copy_mask(&mut self, mask: &str) {
        let entries: Vec<String> = mask
            .split(',')
            .map(|s| s.trim().to_ascii_lowercase())
            .collect();
        let has = |name: &str| entries.iter().any(|e| e == name);
        self.aac = has("aac");
        self.ac3 = has("ac3");
        self.dts = has("dts");
        self.dtshd = has("dtshd");
        self.mp3 = has("mp3");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresetType {
    #[default]
    BuiltIn,
    User,
}

impl PresetType {
    /// Numeric code used by preset files (built-in = 0, user = 1).
    pub fn code(self) -> u8 {
        match self {
            PresetType::BuiltIn => 0,
            PresetType::User => 1,
        }
    }
}

/// Metadata present when a task was loaded from, or saved as, a preset.
/// Never written into a query string.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PresetInfo {
    pub build: u32,
    pub name: String,
    pub description: String,
    pub uses_max_picture_settings: bool,
    pub uses_picture_filters: bool,
    pub uses_picture_settings: bool,
    pub preset_type: PresetType,
}

/// Every encode option as a typed field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodeTask {
    // Source
    pub source: PathBuf,
    pub title: u32,
    pub angle: u32,
    pub point_to_point: PointToPointMode,
    pub start_point: u64,
    pub end_point: u64,
    /// Number of previews the source was scanned with, for preview encodes.
    pub preview_count: u32,

    // Output
    pub destination: PathBuf,
    pub output_format: OutputFormat,
    pub optimize_mp4: bool,
    pub large_file: bool,
    pub ipod_atom: bool,

    // Picture
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub max_width: Option<u32>,
    pub max_height: Option<u32>,
    pub cropping: Option<Cropping>,
    pub anamorphic: Anamorphic,
    pub keep_display_aspect: bool,
    pub display_width: Option<u32>,
    pub pixel_aspect: Option<PixelAspect>,
    pub modulus: u32,

    // Filters
    pub decomb: Decomb,
    pub deinterlace: Deinterlace,
    pub denoise: Denoise,
    /// 0 disables deblocking.
    pub deblock: u32,
    pub detelecine: Detelecine,
    pub grayscale: bool,

    // Video
    pub video_encoder: VideoEncoder,
    /// `None` keeps the source framerate.
    pub framerate: Option<f64>,
    pub framerate_mode: FramerateMode,
    pub rate_control: Option<RateControl>,
    pub two_pass: bool,
    pub turbo_first_pass: bool,
    pub advanced_encoder_options: Option<String>,
    pub x264_preset: Option<String>,
    pub x264_profile: Option<String>,
    pub x264_tune: Option<String>,

    // Audio
    pub audio_tracks: Vec<AudioTrack>,
    pub allowed_passthru: AllowedPassthru,

    // Chapters
    pub include_chapter_markers: bool,

    pub preset: Option<PresetInfo>,
}

pub const DEFAULT_MODULUS: u32 = 16;
pub const DEFAULT_PREVIEW_COUNT: u32 = 10;

impl Default for EncodeTask {
    fn default() -> Self {
        Self {
            source: PathBuf::new(),
            title: 0,
            angle: 0,
            point_to_point: PointToPointMode::default(),
            start_point: 0,
            end_point: 0,
            preview_count: DEFAULT_PREVIEW_COUNT,
            destination: PathBuf::new(),
            output_format: OutputFormat::default(),
            optimize_mp4: false,
            large_file: false,
            ipod_atom: false,
            width: None,
            height: None,
            max_width: None,
            max_height: None,
            cropping: None,
            anamorphic: Anamorphic::default(),
            keep_display_aspect: false,
            display_width: None,
            pixel_aspect: None,
            modulus: DEFAULT_MODULUS,
            decomb: Decomb::default(),
            deinterlace: Deinterlace::default(),
            denoise: Denoise::default(),
            deblock: 0,
            detelecine: Detelecine::default(),
            grayscale: false,
            video_encoder: VideoEncoder::default(),
            framerate: None,
            framerate_mode: FramerateMode::default(),
            rate_control: None,
            two_pass: false,
            turbo_first_pass: false,
            advanced_encoder_options: None,
            x264_preset: None,
            x264_profile: None,
            x264_tune: None,
            audio_tracks: Vec::new(),
            allowed_passthru: AllowedPassthru::default(),
            include_chapter_markers: false,
            preset: None,
        }
    }
}

impl EncodeTask {
    /// Create a task for a source/destination pair with every other option at
    /// its default.
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>, title: u32) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            title,
            ..Self::default()
        }
    }

    pub fn rate_type(&self) -> Option<VideoEncodeRateType> {
        self.rate_control.map(|rc| match rc {
            RateControl::AverageBitrate(_) => VideoEncodeRateType::AverageBitrate,
            RateControl::ConstantQuality(_) => VideoEncodeRateType::ConstantQuality,
        })
    }

    pub fn bitrate(&self) -> Option<u32> {
        match self.rate_control {
            Some(RateControl::AverageBitrate(kbps)) => Some(kbps),
            _ => None,
        }
    }

    pub fn quality(&self) -> Option<f64> {
        match self.rate_control {
            Some(RateControl::ConstantQuality(q)) => Some(q),
            _ => None,
        }
    }

    /// The form a task takes after a trip through the query string.
    ///
    /// Applies the same rules the generator and parser enforce: picture
    /// aspect options only live under custom anamorphic, passthrough tracks
    /// lose their bitrate and sample rate, turbo needs two-pass, a
    /// `1-0` chapter range collapses to chapter 1, and preset metadata is
    /// dropped.
    pub fn normalized(&self) -> EncodeTask {
        let mut task = self.clone();

        if task.point_to_point == PointToPointMode::Chapters
            && task.start_point == 1
            && task.end_point == 0
        {
            task.end_point = task.start_point;
        }
        if matches!(
            task.point_to_point,
            PointToPointMode::Seconds | PointToPointMode::Frames
        ) && task.end_point < task.start_point
        {
            task.end_point = task.start_point;
        }
        if task.point_to_point != PointToPointMode::Preview {
            task.preview_count = DEFAULT_PREVIEW_COUNT;
        }

        if task.anamorphic == Anamorphic::Custom {
            task.pixel_aspect.get_or_insert_with(PixelAspect::default);
        } else {
            task.keep_display_aspect = false;
            task.display_width = None;
            task.pixel_aspect = None;
        }
        if task.modulus == 0 {
            task.modulus = DEFAULT_MODULUS;
        }

        if !task.two_pass {
            task.turbo_first_pass = false;
        }
        if task.advanced_encoder_options.as_deref() == Some("") {
            task.advanced_encoder_options = None;
        }

        for track in &mut task.audio_tracks {
            if track.encoder.is_passthrough() {
                track.bitrate = 0;
                track.sample_rate = 0.0;
            }
        }

        task.preset = None;
        task
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_control_accessors_are_exclusive() {
        let mut task = EncodeTask::default();
        assert_eq!(task.rate_type(), None);
        assert_eq!(task.bitrate(), None);
        assert_eq!(task.quality(), None);

        task.rate_control = Some(RateControl::AverageBitrate(2500));
        assert_eq!(task.rate_type(), Some(VideoEncodeRateType::AverageBitrate));
        assert_eq!(task.bitrate(), Some(2500));
        assert_eq!(task.quality(), None);

        task.rate_control = Some(RateControl::ConstantQuality(20.5));
        assert_eq!(task.rate_type(), Some(VideoEncodeRateType::ConstantQuality));
        assert_eq!(task.bitrate(), None);
        assert_eq!(task.quality(), Some(20.5));
    }

    #[test]
    fn test_passthrough_encoders() {
        assert!(AudioEncoder::Ac3Passthru.is_passthrough());
        assert!(AudioEncoder::Passthrough.is_passthrough());
        assert!(!AudioEncoder::Aac.is_passthrough());
        assert!(!AudioEncoder::Flac24.is_passthrough());
    }

    #[test]
    fn test_cli_names_resolve_back() {
        for encoder in [
            AudioEncoder::Aac,
            AudioEncoder::FdkAac,
            AudioEncoder::Mp3,
            AudioEncoder::Ac3,
            AudioEncoder::Vorbis,
            AudioEncoder::Flac16,
            AudioEncoder::Flac24,
            AudioEncoder::AacPassthru,
            AudioEncoder::Ac3Passthru,
            AudioEncoder::DtsPassthru,
            AudioEncoder::DtsHdPassthru,
            AudioEncoder::Mp3Passthru,
            AudioEncoder::Passthrough,
        ] {
            assert_eq!(AudioEncoder::from_cli_name(encoder.cli_name()), Some(encoder));
        }
        assert_eq!(VideoEncoder::from_cli_name("ffmpeg"), Some(VideoEncoder::Mpeg4));
        assert_eq!(OutputFormat::from_cli_name("m4v"), Some(OutputFormat::Mp4));
        assert_eq!(Mixdown::from_cli_name("6ch"), Some(Mixdown::FivePointOne));
        assert_eq!(Mixdown::from_cli_name("quad"), None);
    }

    #[test]
    fn test_copy_mask_roundtrip() {
        let mut allowed = AllowedPassthru {
            ac3: true,
            dts: true,
            ..Default::default()
        };
        assert_eq!(allowed.copy_mask().as_deref(), Some("ac3,dts"));

        allowed.apply_copy_mask("aac, dtshd");
        assert!(allowed.aac);
        assert!(allowed.dtshd);
        assert!(!allowed.dts);
        assert!(!allowed.ac3);
        assert_eq!(AllowedPassthru::default().copy_mask(), None);
    }

    #[test]
    fn test_normalized_applies_codec_rules() {
        let task = EncodeTask {
            start_point: 1,
            end_point: 0,
            anamorphic: Anamorphic::Loose,
            pixel_aspect: Some(PixelAspect { x: 8, y: 9 }),
            keep_display_aspect: true,
            turbo_first_pass: true,
            audio_tracks: vec![AudioTrack {
                encoder: AudioEncoder::Ac3Passthru,
                bitrate: 640,
                sample_rate: 48.0,
                ..Default::default()
            }],
            preset: Some(PresetInfo {
                name: "Normal".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };

        let normalized = task.normalized();
        assert_eq!(normalized.end_point, 1);
        assert_eq!(normalized.pixel_aspect, None);
        assert!(!normalized.keep_display_aspect);
        assert!(!normalized.turbo_first_pass);
        assert_eq!(normalized.audio_tracks[0].bitrate, 0);
        assert_eq!(normalized.audio_tracks[0].sample_rate, 0.0);
        assert_eq!(normalized.preset, None);
    }

    #[test]
    fn test_custom_anamorphic_gets_square_pixels_by_default() {
        let task = EncodeTask {
            anamorphic: Anamorphic::Custom,
            ..Default::default()
        };
        assert_eq!(task.normalized().pixel_aspect, Some(PixelAspect { x: 1, y: 1 }));
    }

    #[test]
    fn test_task_json_roundtrip_keeps_rate_control() {
        let task = EncodeTask {
            rate_control: Some(RateControl::ConstantQuality(22.0)),
            denoise: Denoise::Custom("2:1:2:3".to_string()),
            ..EncodeTask::new("/in/movie.mkv", "/out/movie.mp4", 1)
        };
        let json = serde_json::to_string(&task).unwrap();
        let back: EncodeTask = serde_json::from_str(&json).unwrap();
        assert_eq!(back, task);
    }
}
