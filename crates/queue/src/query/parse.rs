//! Query string to EncodeTask.
//!
//! Each flag is looked up on its own. A missing flag leaves the field at its
//! default and a value that does not parse is skipped, so one bad option never
//! costs the rest of the task.

use super::args::{tokenize, QueryToken};
use crate::task::{
    Anamorphic, AudioEncoder, AudioTrack, Cropping, Decomb, Deinterlace, Denoise, Detelecine,
    EncodeTask, FramerateMode, Mixdown, OutputFormat, PixelAspect, PointToPointMode,
    RateControl, VideoEncoder,
};
use regex::Regex;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::LazyLock;

static CHAPTERS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)(?:-(\d+))?$").expect("valid regex"));
static CROP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+):(\d+):(\d+):(\d+)$").expect("valid regex"));
static PIXEL_ASPECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+):(\d+)$").expect("valid regex"));
static RANGE_POINT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(duration|frame):(\d+)$").expect("valid regex"));
static LEADING_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)").expect("valid regex"));

/// Tokenized query with lenient flag lookups.
struct QueryArgs {
    tokens: Vec<QueryToken>,
}

impl QueryArgs {
    fn new(query: &str) -> Self {
        Self {
            tokens: tokenize(query),
        }
    }

    /// Unquoted tokens, the only ones that can be flags.
    fn flags(&self) -> impl Iterator<Item = (usize, &str)> {
        self.tokens
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.quoted)
            .map(|(i, t)| (i, t.text.as_str()))
    }

    /// True for `flag` on its own or in `flag=value` form.
    fn has(&self, flag: &str) -> bool {
        self.flags()
            .any(|(_, t)| t == flag || attached_value(t, flag).is_some())
    }

    /// Value from `flag value` or `flag=value`.
    ///
    /// A following token that looks like a flag is only taken when it was
    /// quoted.
    fn value(&self, flag: &str) -> Option<&str> {
        for (i, token) in self.flags() {
            if let Some(value) = attached_value(token, flag) {
                return Some(value);
            }
            if token == flag {
                return self
                    .tokens
                    .get(i + 1)
                    .filter(|next| next.quoted || !looks_like_flag(&next.text))
                    .map(|next| next.text.as_str());
            }
        }
        None
    }

    /// Value from `flag=value` only.
    fn attached(&self, flag: &str) -> Option<&str> {
        self.flags().find_map(|(_, t)| attached_value(t, flag))
    }

    fn parsed<T: FromStr>(&self, flag: &str) -> Option<T> {
        self.value(flag).and_then(|v| v.trim().parse().ok())
    }

    fn list(&self, flag: &str) -> Option<Vec<&str>> {
        self.value(flag)
            .map(|v| v.split(',').map(str::trim).collect())
    }

    fn attached_list(&self, flag: &str) -> Option<Vec<&str>> {
        self.attached(flag)
            .map(|v| v.split(',').map(str::trim).collect())
    }
}

fn attached_value<'a>(token: &'a str, flag: &str) -> Option<&'a str> {
    token
        .strip_prefix(flag)
        .and_then(|rest| rest.strip_prefix('='))
}

/// `-x`, `--crop`; but not `-5` or `-`.
fn looks_like_flag(token: &str) -> bool {
    let mut chars = token.chars();
    chars.next() == Some('-')
        && chars
            .next()
            .map_or(false, |c| c.is_ascii_alphabetic() || c == '-')
}

/// Parse a query string into a task.
pub fn parse_query(query: &str) -> EncodeTask {
    let args = QueryArgs::new(query);
    let mut task = EncodeTask::default();

    parse_source(&args, &mut task);
    parse_output(&args, &mut task);
    parse_picture(&args, &mut task);
    parse_filters(&args, &mut task);
    parse_video(&args, &mut task);
    parse_audio(&args, &mut task);

    task.include_chapter_markers = args.has("-m") || args.has("--markers");

    if let Some(opts) = args.value("-x") {
        if !opts.is_empty() {
            task.advanced_encoder_options = Some(opts.to_string());
        }
    }
    task.x264_preset = args.value("--x264-preset").map(str::to_string);
    task.x264_profile = args.value("--x264-profile").map(str::to_string);
    task.x264_tune = args.value("--x264-tune").map(str::to_string);

    task
}

fn parse_source(args: &QueryArgs, task: &mut EncodeTask) {
    if let Some(source) = args.value("-i") {
        task.source = PathBuf::from(source);
    }
    if let Some(title) = args.parsed("-t") {
        task.title = title;
    }
    if let Some(angle) = args.parsed("--angle") {
        task.angle = angle;
    }

    if let Some(preview) = args.parsed::<u64>("--start-at-preview") {
        task.point_to_point = PointToPointMode::Preview;
        task.start_point = preview;
        if let Some(("duration", seconds)) = args.value("--stop-at").and_then(range_point) {
            task.end_point = seconds;
        }
        if let Some(count) = args
            .value("--previews")
            .and_then(|v| LEADING_NUMBER_RE.captures(v))
            .and_then(|c| c[1].parse().ok())
        {
            task.preview_count = count;
        }
        return;
    }

    if let Some((unit, start)) = args.value("--start-at").and_then(range_point) {
        task.point_to_point = if unit == "frame" {
            PointToPointMode::Frames
        } else {
            PointToPointMode::Seconds
        };
        task.start_point = start;
        task.end_point = start;
        if let Some((stop_unit, length)) = args.value("--stop-at").and_then(range_point) {
            if stop_unit == unit {
                task.end_point = start.saturating_add(length);
            }
        }
        return;
    }

    if let Some(caps) = args.value("-c").and_then(|v| CHAPTERS_RE.captures(v)) {
        let Ok(start) = caps[1].parse::<u64>() else {
            return;
        };
        // A lone chapter number selects just that chapter.
        let end = match caps.get(2) {
            Some(m) => match m.as_str().parse::<u64>() {
                Ok(end) => end,
                Err(_) => return,
            },
            None => start,
        };
        task.point_to_point = PointToPointMode::Chapters;
        task.start_point = start;
        task.end_point = if start == 1 && end == 0 { start } else { end };
    }
}

fn range_point(value: &str) -> Option<(&'static str, u64)> {
    let caps = RANGE_POINT_RE.captures(value)?;
    let unit = if &caps[1] == "frame" { "frame" } else { "duration" };
    let amount = caps[2].parse().ok()?;
    Some((unit, amount))
}

fn parse_output(args: &QueryArgs, task: &mut EncodeTask) {
    if let Some(dest) = args.value("-o") {
        task.destination = PathBuf::from(dest);
    }
    if let Some(format) = args.value("-f").and_then(OutputFormat::from_cli_name) {
        task.output_format = format;
    }
    task.large_file = args.has("-4");
    task.ipod_atom = args.has("-I");
    task.optimize_mp4 = args.has("-O");
}

fn parse_picture(args: &QueryArgs, task: &mut EncodeTask) {
    task.width = args.parsed("-w");
    task.height = args.parsed("-l");
    task.max_width = args.parsed("-X");
    task.max_height = args.parsed("-Y");

    // A malformed crop leaves the crop alone and nothing else.
    if let Some(caps) = args.value("--crop").and_then(|v| CROP_RE.captures(v)) {
        let values: Option<Vec<u32>> = (1..=4).map(|i| caps[i].parse().ok()).collect();
        if let Some(v) = values {
            task.cropping = Some(Cropping::new(v[0], v[1], v[2], v[3]));
        }
    }

    task.anamorphic = if args.has("--strict-anamorphic") {
        Anamorphic::Strict
    } else if args.has("--loose-anamorphic") {
        Anamorphic::Loose
    } else if args.has("--custom-anamorphic") {
        Anamorphic::Custom
    } else {
        Anamorphic::None
    };

    if task.anamorphic == Anamorphic::Custom {
        task.keep_display_aspect = args.has("--keep-display-aspect");
        task.display_width = args.parsed("--display-width");
        task.pixel_aspect = args
            .value("--pixel-aspect")
            .and_then(|v| PIXEL_ASPECT_RE.captures(v))
            .and_then(|caps| {
                Some(PixelAspect {
                    x: caps[1].parse().ok()?,
                    y: caps[2].parse().ok()?,
                })
            });
    }

    if let Some(modulus) = args.parsed::<u32>("--modulus") {
        if modulus > 0 {
            task.modulus = modulus;
        }
    }
}

fn parse_filters(args: &QueryArgs, task: &mut EncodeTask) {
    // Custom values only count when they ride on the enabling flag.
    if args.has("--decomb") {
        task.decomb = match args.attached("--decomb") {
            Some(value) if !value.is_empty() => Decomb::Custom(value.to_string()),
            _ => Decomb::Default,
        };
    }

    if args.has("--detelecine") {
        task.detelecine = match args.attached("--detelecine") {
            Some(value) if !value.is_empty() => Detelecine::Custom(value.to_string()),
            _ => Detelecine::Default,
        };
    }

    if let Some(value) = args.attached("--deinterlace").filter(|v| !v.is_empty()) {
        task.deinterlace = Deinterlace::from_value(value);
    }

    if let Some(value) = args.attached("--denoise").filter(|v| !v.is_empty()) {
        task.denoise = Denoise::from_value(value);
    }

    if let Some(strength) = args.attached("--deblock").and_then(|v| v.parse().ok()) {
        task.deblock = strength;
    }

    task.grayscale = args.has("-g");
}

fn parse_video(args: &QueryArgs, task: &mut EncodeTask) {
    if let Some(encoder) = args.value("-e").and_then(VideoEncoder::from_cli_name) {
        task.video_encoder = encoder;
    }

    task.framerate = args.parsed("-r");
    task.framerate_mode = if args.has("--pfr") {
        FramerateMode::Pfr
    } else if args.has("--cfr") {
        FramerateMode::Cfr
    } else {
        FramerateMode::Vfr
    };

    // Quality wins when both are given.
    if let Some(kbps) = args.parsed("-b") {
        task.rate_control = Some(RateControl::AverageBitrate(kbps));
    }
    if let Some(quality) = args.parsed("-q") {
        task.rate_control = Some(RateControl::ConstantQuality(quality));
    }

    task.two_pass = args.has("-2");
    task.turbo_first_pass = args.has("-T");
}

fn parse_audio(args: &QueryArgs, task: &mut EncodeTask) {
    if args.value("-a") != Some("none") {
        let tracks = args.list("-a");
        let encoders = args.list("-E");
        let count = tracks
            .as_ref()
            .map_or(0, Vec::len)
            .max(encoders.as_ref().map_or(0, Vec::len));

        let bitrates = args.list("-B");
        let sample_rates = args.list("-R");
        let mixdowns = args.list("-6");
        let drcs = args.list("-D");
        let gains = args.attached_list("--gain");

        task.audio_tracks = (0..count)
            .map(|x| {
                let mut track = AudioTrack {
                    track: x as u32 + 1,
                    ..AudioTrack::default()
                };
                if let Some(index) = nth(&tracks, x).and_then(|v| v.parse().ok()) {
                    track.track = index;
                }
                if let Some(encoder) = nth(&encoders, x).and_then(AudioEncoder::from_cli_name) {
                    track.encoder = encoder;
                }
                if let Some(bitrate) = nth(&bitrates, x).and_then(parse_auto) {
                    track.bitrate = bitrate as u32;
                }
                if let Some(rate) = nth(&sample_rates, x).and_then(parse_auto) {
                    track.sample_rate = rate;
                }
                if let Some(mixdown) = nth(&mixdowns, x).and_then(Mixdown::from_cli_name) {
                    track.mixdown = mixdown;
                }
                if let Some(drc) = nth(&drcs, x).and_then(|v| v.parse().ok()) {
                    track.drc = drc;
                }
                if let Some(gain) = nth(&gains, x).and_then(|v| v.parse().ok()) {
                    track.gain = gain;
                }
                track
            })
            .collect();
    }

    if let Some(mask) = args.value("--audio-copy-mask") {
        task.allowed_passthru.apply_copy_mask(mask);
    }
    if let Some(fallback) = args.value("--audio-fallback") {
        task.allowed_passthru.fallback = AudioEncoder::from_cli_name(fallback);
    }
}

/// Entry `x` of a comma-joined list, if the list and the entry exist.
fn nth<'a>(list: &Option<Vec<&'a str>>, x: usize) -> Option<&'a str> {
    list.as_ref().and_then(|l| l.get(x).copied())
}

/// `auto` (any case) is the 0 sentinel.
fn parse_auto(value: &str) -> Option<f64> {
    if value.eq_ignore_ascii_case("auto") {
        Some(0.0)
    } else {
        value.parse::<f64>().ok().filter(|v| *v >= 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_chapter_shorthand() {
        let task = parse_query("-i in.mkv -t 1 -c 1");
        assert_eq!(task.point_to_point, PointToPointMode::Chapters);
        assert_eq!(task.start_point, 1);
        assert_eq!(task.end_point, 1);

        let task = parse_query("-c 1-0");
        assert_eq!((task.start_point, task.end_point), (1, 1));

        let task = parse_query("-c 4-9");
        assert_eq!((task.start_point, task.end_point), (4, 9));
    }

    #[test]
    fn test_malformed_crop_is_isolated() {
        let task = parse_query(
            r#"-i "in.mkv" -t 2 --crop 1:2:x:4 -w 1280 -e x265 -q 22 --decomb -m"#,
        );
        assert_eq!(task.cropping, None);
        assert_eq!(task.title, 2);
        assert_eq!(task.width, Some(1280));
        assert_eq!(task.video_encoder, VideoEncoder::X265);
        assert_eq!(task.quality(), Some(22.0));
        assert_eq!(task.decomb, Decomb::Default);
        assert!(task.include_chapter_markers);
    }

    #[test]
    fn test_bad_numbers_are_skipped() {
        let task = parse_query("-t abc -w 720 -l nope -r 2x5 -b 1500");
        assert_eq!(task.title, 0);
        assert_eq!(task.width, Some(720));
        assert_eq!(task.height, None);
        assert_eq!(task.framerate, None);
        assert_eq!(task.bitrate(), Some(1500));
    }

    #[test]
    fn test_quality_wins_over_bitrate() {
        let task = parse_query("-b 2000 -q 20.5");
        assert_eq!(task.rate_control, Some(RateControl::ConstantQuality(20.5)));
        assert_eq!(task.bitrate(), None);
    }

    #[test]
    fn test_no_rate_flags_leave_mode_unset() {
        assert_eq!(parse_query("-e x264").rate_control, None);
    }

    #[test]
    fn test_framerate_mode_precedence() {
        assert_eq!(parse_query("--cfr --pfr").framerate_mode, FramerateMode::Pfr);
        assert_eq!(parse_query("-r 25 --cfr").framerate_mode, FramerateMode::Cfr);
        assert_eq!(parse_query("-r 25").framerate_mode, FramerateMode::Vfr);
    }

    #[test]
    fn test_filter_values() {
        let task = parse_query(
            r#"--decomb="7:2:6:9" --deinterlace="Slowest" --denoise="2:1:2:3" --detelecine --deblock=bad"#,
        );
        assert_eq!(task.decomb, Decomb::Custom("7:2:6:9".to_string()));
        assert_eq!(task.deinterlace, Deinterlace::Slowest);
        assert_eq!(task.denoise, Denoise::Custom("2:1:2:3".to_string()));
        assert_eq!(task.detelecine, Detelecine::Default);
        assert_eq!(task.deblock, 0);
    }

    #[test]
    fn test_audio_lists_stay_aligned() {
        let task = parse_query(
            "-a 1,3 -E av_aac,copy:dts -B 128,auto -R Auto,48 -6 stereo,none -D 1.5,0 --gain=-3,2",
        );
        assert_eq!(task.audio_tracks.len(), 2);

        let first = &task.audio_tracks[0];
        assert_eq!(first.track, 1);
        assert_eq!(first.encoder, AudioEncoder::Aac);
        assert_eq!(first.bitrate, 128);
        assert_eq!(first.sample_rate, 0.0);
        assert_eq!(first.mixdown, Mixdown::Stereo);
        assert_eq!(first.drc, 1.5);
        assert_eq!(first.gain, -3);

        let second = &task.audio_tracks[1];
        assert_eq!(second.track, 3);
        assert_eq!(second.encoder, AudioEncoder::DtsPassthru);
        assert_eq!(second.bitrate, 0);
        assert_eq!(second.sample_rate, 48.0);
        assert_eq!(second.mixdown, Mixdown::None);
        assert_eq!(second.gain, 2);
    }

    #[test]
    fn test_no_audio() {
        let task = parse_query("-a none --audio-copy-mask ac3,dts --audio-fallback ac3");
        assert!(task.audio_tracks.is_empty());
        assert!(task.allowed_passthru.ac3);
        assert!(task.allowed_passthru.dts);
        assert!(!task.allowed_passthru.aac);
        assert_eq!(task.allowed_passthru.fallback, Some(AudioEncoder::Ac3));
    }

    #[test]
    fn test_pixel_aspect_needs_custom_anamorphic() {
        let loose = parse_query("--loose-anamorphic --pixel-aspect 8:9 --keep-display-aspect");
        assert_eq!(loose.anamorphic, Anamorphic::Loose);
        assert_eq!(loose.pixel_aspect, None);
        assert!(!loose.keep_display_aspect);

        let custom = parse_query("--custom-anamorphic --pixel-aspect 8:9 --display-width 720");
        assert_eq!(custom.pixel_aspect, Some(PixelAspect { x: 8, y: 9 }));
        assert_eq!(custom.display_width, Some(720));
    }

    #[test]
    fn test_seconds_and_frames_ranges() {
        let seconds = parse_query("--start-at duration:30 --stop-at duration:60");
        assert_eq!(seconds.point_to_point, PointToPointMode::Seconds);
        assert_eq!((seconds.start_point, seconds.end_point), (30, 90));

        let frames = parse_query("--start-at frame:100 --stop-at frame:250");
        assert_eq!(frames.point_to_point, PointToPointMode::Frames);
        assert_eq!((frames.start_point, frames.end_point), (100, 350));
    }

    #[test]
    fn test_preview_range() {
        let task = parse_query("--previews 30:0 --start-at-preview 4 --stop-at duration:15");
        assert_eq!(task.point_to_point, PointToPointMode::Preview);
        assert_eq!(task.preview_count, 30);
        assert_eq!((task.start_point, task.end_point), (4, 15));
    }

    #[test]
    fn test_flags_inside_quoted_paths_are_ignored() {
        let task = parse_query(r#"-i "C:\clips\take -g -2.mkv" -o "out -m.mp4""#);
        assert_eq!(task.source, PathBuf::from(r"C:\clips\take -g -2.mkv"));
        assert!(!task.grayscale);
        assert!(!task.two_pass);
        assert!(!task.include_chapter_markers);
    }

    #[test]
    fn test_hyphen_leading_paths_survive_round_trip() {
        let task = parse_query(r#"-i "-intro.mkv" -t 1 -o "-out.mp4" -f av_mp4 -e x264 -a none"#);
        assert_eq!(task.source, PathBuf::from("-intro.mkv"));
        assert_eq!(task.destination, PathBuf::from("-out.mp4"));
        assert_eq!(task.title, 1);

        let again = parse_query(&crate::query::generate_query(&task));
        assert_eq!(again.source, task.source);
        assert_eq!(again.destination, task.destination);
    }

    #[test]
    fn test_quoted_flag_text_is_a_value() {
        let task = parse_query(r#"-x "-m" -o "-m""#);
        assert_eq!(task.advanced_encoder_options.as_deref(), Some("-m"));
        assert_eq!(task.destination, PathBuf::from("-m"));
        assert!(!task.include_chapter_markers);
    }

    #[test]
    fn test_advanced_value_not_taken_from_next_flag() {
        let task = parse_query("-x -m --x264-preset slow");
        assert_eq!(task.advanced_encoder_options, None);
        assert!(task.include_chapter_markers);
        assert_eq!(task.x264_preset.as_deref(), Some("slow"));
    }

    #[test]
    fn test_empty_query_is_default_task() {
        assert_eq!(parse_query(""), EncodeTask::default());
    }
}
