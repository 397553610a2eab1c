//! EncodeTask to query string.

use super::args::{quote_arg, quote_if_needed};
use crate::config::EngineConfig;
use crate::task::{
    Anamorphic, AudioTrack, Decomb, Deinterlace, Denoise, Detelecine, EncodeTask,
    FramerateMode, PixelAspect, PointToPointMode, RateControl, DEFAULT_MODULUS,
};
use std::fmt::Display;

/// Engine switches that are not part of the task itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Emits `--verbose=N`
    pub verbosity: Option<u8>,
    /// Emits `--no-dvdnav`
    pub disable_dvdnav: bool,
}

impl QueryOptions {
    pub fn from_engine_config(engine: &EngineConfig) -> Self {
        Self {
            verbosity: Some(engine.verbosity),
            disable_dvdnav: engine.disable_dvdnav,
        }
    }
}

#[derive(Default)]
struct QueryBuilder {
    parts: Vec<String>,
}

impl QueryBuilder {
    fn flag(&mut self, flag: &str) {
        self.parts.push(flag.to_string());
    }

    fn arg(&mut self, flag: &str, value: impl Display) {
        self.parts.push(flag.to_string());
        self.parts.push(value.to_string());
    }

    fn attached(&mut self, flag: &str, value: impl Display) {
        self.parts.push(format!("{}={}", flag, value));
    }

    fn finish(self) -> String {
        self.parts.join(" ")
    }
}

/// Serialize a task with no extra engine switches.
pub fn generate_query(task: &EncodeTask) -> String {
    generate_query_with(task, &QueryOptions::default())
}

/// Serialize a task into a query string.
///
/// Flags whose value equals the parser's default are left out.
pub fn generate_query_with(task: &EncodeTask, options: &QueryOptions) -> String {
    let mut q = QueryBuilder::default();

    source_args(&mut q, task);
    output_args(&mut q, task);
    picture_args(&mut q, task);
    filter_args(&mut q, task);
    video_args(&mut q, task);
    audio_args(&mut q, task);

    if task.include_chapter_markers {
        q.flag("-m");
    }

    advanced_args(&mut q, task);

    if let Some(level) = options.verbosity {
        q.attached("--verbose", level);
    }
    if options.disable_dvdnav {
        q.flag("--no-dvdnav");
    }

    q.finish()
}

fn source_args(q: &mut QueryBuilder, task: &EncodeTask) {
    if !task.source.as_os_str().is_empty() {
        q.arg("-i", quote_arg(&task.source.to_string_lossy()));
    }
    if task.title > 0 {
        q.arg("-t", task.title);
    }
    if task.angle > 0 {
        q.arg("--angle", task.angle);
    }

    let start = task.start_point;
    let end = task.end_point;
    match task.point_to_point {
        PointToPointMode::Chapters => {
            if start == end && start > 0 {
                q.arg("-c", start);
            } else if start != end {
                q.arg("-c", format!("{}-{}", start, end));
            }
        }
        PointToPointMode::Seconds => {
            q.arg("--start-at", format!("duration:{}", start));
            q.arg("--stop-at", format!("duration:{}", end.saturating_sub(start)));
        }
        PointToPointMode::Frames => {
            q.arg("--start-at", format!("frame:{}", start));
            q.arg("--stop-at", format!("frame:{}", end.saturating_sub(start)));
        }
        PointToPointMode::Preview => {
            q.arg("--previews", task.preview_count);
            q.arg("--start-at-preview", start);
            q.arg("--stop-at", format!("duration:{}", end));
        }
    }
}

fn output_args(q: &mut QueryBuilder, task: &EncodeTask) {
    if !task.destination.as_os_str().is_empty() {
        q.arg("-o", quote_arg(&task.destination.to_string_lossy()));
    }
    q.arg("-f", task.output_format.cli_name());
    if task.large_file {
        q.flag("-4");
    }
    if task.ipod_atom {
        q.flag("-I");
    }
    if task.optimize_mp4 {
        q.flag("-O");
    }
}

fn picture_args(q: &mut QueryBuilder, task: &EncodeTask) {
    let dims = [
        ("-w", task.width),
        ("-l", task.height),
        ("-X", task.max_width),
        ("-Y", task.max_height),
    ];
    for (flag, value) in dims {
        if let Some(value) = value {
            q.arg(flag, value);
        }
    }

    if let Some(crop) = task.cropping {
        q.arg(
            "--crop",
            format!("{}:{}:{}:{}", crop.top, crop.bottom, crop.left, crop.right),
        );
    }

    match task.anamorphic {
        Anamorphic::None => {}
        Anamorphic::Strict => q.flag("--strict-anamorphic"),
        Anamorphic::Loose => q.flag("--loose-anamorphic"),
        Anamorphic::Custom => {
            q.flag("--custom-anamorphic");
            if let Some(width) = task.display_width {
                q.arg("--display-width", width);
            }
            if task.keep_display_aspect {
                q.flag("--keep-display-aspect");
            }
            let par = task.pixel_aspect.unwrap_or_else(PixelAspect::default);
            q.arg("--pixel-aspect", format!("{}:{}", par.x, par.y));
        }
    }

    if task.modulus > 0 && task.modulus != DEFAULT_MODULUS {
        q.arg("--modulus", task.modulus);
    }
}

fn filter_args(q: &mut QueryBuilder, task: &EncodeTask) {
    match &task.detelecine {
        Detelecine::Off => {}
        Detelecine::Default => q.flag("--detelecine"),
        Detelecine::Custom(value) => q.attached("--detelecine", quote_arg(value)),
    }

    match &task.decomb {
        Decomb::Off => {}
        Decomb::Default => q.flag("--decomb"),
        Decomb::Custom(value) => q.attached("--decomb", quote_arg(value)),
    }

    match &task.deinterlace {
        Deinterlace::Off => {}
        Deinterlace::Custom(value) => q.attached("--deinterlace", quote_arg(value)),
        preset => {
            if let Some(name) = preset.preset_name() {
                q.attached("--deinterlace", quote_arg(name));
            }
        }
    }

    match &task.denoise {
        Denoise::Off => {}
        Denoise::Custom(value) => q.attached("--denoise", quote_arg(value)),
        preset => {
            if let Some(name) = preset.preset_name() {
                q.attached("--denoise", quote_arg(name));
            }
        }
    }

    if task.deblock > 0 {
        q.attached("--deblock", task.deblock);
    }

    if task.grayscale {
        q.flag("-g");
    }
}

fn video_args(q: &mut QueryBuilder, task: &EncodeTask) {
    q.arg("-e", task.video_encoder.cli_name());

    match task.rate_control {
        Some(RateControl::AverageBitrate(kbps)) => q.arg("-b", kbps),
        Some(RateControl::ConstantQuality(quality)) => q.arg("-q", quality),
        None => {}
    }

    if task.two_pass {
        q.flag("-2");
        if task.turbo_first_pass {
            q.flag("-T");
        }
    }

    if let Some(fps) = task.framerate {
        q.arg("-r", fps);
    }

    match task.framerate_mode {
        FramerateMode::Cfr => q.flag("--cfr"),
        FramerateMode::Pfr => q.flag("--pfr"),
        FramerateMode::Vfr => {}
    }
}

fn audio_args(q: &mut QueryBuilder, task: &EncodeTask) {
    let tracks = &task.audio_tracks;
    if tracks.is_empty() {
        q.arg("-a", "none");
    } else {
        q.arg("-a", join(tracks, |t| t.track.to_string()));
        q.arg("-E", join(tracks, |t| t.encoder.cli_name().to_string()));
        q.arg("-B", join(tracks, bitrate_token));
        q.arg("-R", join(tracks, sample_rate_token));
        q.arg("-6", join(tracks, |t| t.mixdown.cli_name().to_string()));

        if tracks.iter().any(|t| t.drc != 0.0) {
            q.arg("-D", join(tracks, |t| t.drc.to_string()));
        }
        if tracks.iter().any(|t| t.gain != 0) {
            q.attached("--gain", join(tracks, |t| t.gain.to_string()));
        }
    }

    if let Some(mask) = task.allowed_passthru.copy_mask() {
        q.arg("--audio-copy-mask", mask);
    }
    if let Some(fallback) = task.allowed_passthru.fallback {
        q.arg("--audio-fallback", fallback.cli_name());
    }
}

fn bitrate_token(track: &AudioTrack) -> String {
    if track.encoder.is_passthrough() || track.bitrate == 0 {
        "auto".to_string()
    } else {
        track.bitrate.to_string()
    }
}

fn sample_rate_token(track: &AudioTrack) -> String {
    if track.encoder.is_passthrough() || track.sample_rate == 0.0 {
        "auto".to_string()
    } else {
        track.sample_rate.to_string()
    }
}

fn join(tracks: &[AudioTrack], f: impl Fn(&AudioTrack) -> String) -> String {
    tracks.iter().map(f).collect::<Vec<_>>().join(",")
}

fn advanced_args(q: &mut QueryBuilder, task: &EncodeTask) {
    if let Some(opts) = task.advanced_encoder_options.as_deref() {
        if !opts.is_empty() {
            q.arg("-x", quote_if_needed(opts));
        }
    }
    let x264 = [
        ("--x264-preset", &task.x264_preset),
        ("--x264-profile", &task.x264_profile),
        ("--x264-tune", &task.x264_tune),
    ];
    for (flag, value) in x264 {
        if let Some(value) = value {
            q.arg(flag, quote_if_needed(value));
        }
    }
}
