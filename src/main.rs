use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, CommandFactory, ErrorKind, Parser, Subcommand};

use bugwatch::logo;
use bugwatch::output::CutListFormat;
use bugwatch::video::{SampleMode, DEFAULT_SAMPLE_PERIOD};

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum Sampling {
    Period,
    Keyframes,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum CutList {
    Csv,
    Edl,
}

impl From<CutList> for CutListFormat {
    fn from(c: CutList) -> Self {
        match c {
            CutList::Csv => CutListFormat::Csv,
            CutList::Edl => CutListFormat::Edl,
        }
    }
}

#[derive(clap::Args, Debug)]
struct AnalysisArgs {
    #[clap(
        long,
        default_value_t = logo::DEFAULT_SCENE_CHANGE_THRESHOLD,
        value_parser = clap::value_parser!(f32),
        help = "Mean luminance difference (0 to 1) between consecutive frames above which a scene change is reported."
    )]
    scene_change_threshold: f32,

    #[clap(
        long,
        default_value_t = logo::DEFAULT_BLACK_WHITE_THRESHOLD,
        value_parser = clap::value_parser!(f32),
        help = "Luminance (0 to 1) below which a frame is considered black, or above 1 minus this value, white."
    )]
    black_threshold: f32,

    #[clap(
        long,
        value_enum,
        default_value_t = Sampling::Period,
        help = "Which frames to analyze. 'period' decodes one frame per --sample-period; 'keyframes' only decodes keyframes, which is much faster but less precise."
    )]
    sampling: Sampling,

    #[clap(
        long,
        default_value_t = DEFAULT_SAMPLE_PERIOD.as_secs_f32(),
        value_parser = clap::value_parser!(f32),
        help = "Time between analyzed frames, in seconds."
    )]
    sample_period: f32,

    #[clap(
        long,
        default_value_t = logo::DEFAULT_WINDOW_LENGTH.as_secs_f32(),
        value_parser = clap::value_parser!(f32),
        help = "Length of the rolling window that frames are averaged over before being compared to the logo, in seconds."
    )]
    window_length: f32,

    #[clap(
        long,
        value_parser = clap::value_parser!(usize),
        help = "Stop analyzing each video after this many frames."
    )]
    frame_limit: Option<usize>,

    #[clap(
        long,
        default_value = "false",
        action(ArgAction::SetTrue),
        help = "Enable multi-threaded decoding in FFmpeg."
    )]
    threaded_decoding: bool,

    #[clap(
        long,
        default_value = "false",
        action(ArgAction::SetTrue),
        help = "Only use software decoding, even if a hardware decoder is available."
    )]
    no_hardware: bool,

    #[clap(
        long,
        default_value = "false",
        action(ArgAction::SetTrue),
        help = "Rebuild logo references and re-analyze all videos, ignoring any cached data on disk."
    )]
    force: bool,
}

// NaN fails every comparison, so these are written to reject it.
fn is_positive(x: f32) -> bool {
    x > 0.0 && x.is_finite()
}

fn is_non_negative(x: f32) -> bool {
    x >= 0.0 && x.is_finite()
}

impl AnalysisArgs {
    fn check(&self) -> Result<(), &'static str> {
        if !(0.0..=1.0).contains(&self.scene_change_threshold) {
            return Err("scene_change_threshold must be between 0 and 1");
        }
        if !(0.0..0.5).contains(&self.black_threshold) {
            return Err("black_threshold must be between 0 and 0.5");
        }
        if !is_positive(self.sample_period) {
            return Err("sample_period must be a positive number");
        }
        if !is_positive(self.window_length) {
            return Err("window_length must be a positive number");
        }
        Ok(())
    }

    fn analyzer(&self, videos: Vec<PathBuf>) -> logo::Analyzer<PathBuf> {
        let sample_mode = match self.sampling {
            Sampling::Period => SampleMode::Period(Duration::from_secs_f32(self.sample_period)),
            Sampling::Keyframes => SampleMode::Keyframes,
        };
        logo::Analyzer::from_files(videos, self.threaded_decoding, self.force)
            .with_scene_change_threshold(self.scene_change_threshold)
            .with_black_threshold(self.black_threshold)
            .with_sample_mode(sample_mode)
            .with_window_length(Duration::from_secs_f32(self.window_length))
            .with_frame_limit(self.frame_limit)
            .with_hardware_decoding(!self.no_hardware)
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[clap(after_help = "Displays info about bugwatch and its dependencies.")]
    Info,

    #[clap(
        arg_required_else_help = true,
        after_help = "Decode one or more video files into a time series of logo scores and scene events. The logo reference and analysis data are written to disk alongside each video file, and are used by the 'search' command."
    )]
    Analyze {
        #[clap(
            required = true,
            multiple_values = true,
            value_parser = clap::value_parser!(PathBuf),
            help = "Video files or directories to analyze."
        )]
        paths: Vec<PathBuf>,

        #[clap(flatten)]
        analysis: AnalysisArgs,
    },

    #[clap(
        arg_required_else_help = true,
        after_help = "Find the segments in which the logo is on screen, using analysis data. Analysis data can either be pre-computed and stored alongside video files using the 'analyze' command, or generated as part of the search by specifying the --analyze flag."
    )]
    Search {
        #[clap(
            required = true,
            multiple_values = true,
            value_parser = clap::value_parser!(PathBuf),
            help = "Video files or directories to search for logo segments in."
        )]
        paths: Vec<PathBuf>,

        #[clap(
            long,
            default_value_t = logo::DEFAULT_LOGO_THRESHOLD,
            value_parser = clap::value_parser!(f32),
            help = "Logo score at or above which a sample counts as showing the logo. A rolling window that looks exactly like the logo reference scores 1.0."
        )]
        logo_threshold: f32,

        #[clap(
            long,
            default_value_t = logo::DEFAULT_MIN_SEGMENT_DURATION,
            value_parser = clap::value_parser!(u16),
            help = "Minimum segment duration, in seconds. Shorter runs of logo presence are dropped."
        )]
        min_duration: u16,

        #[clap(
            long,
            default_value = "false",
            action(ArgAction::SetTrue),
            help = "Move segment boundaries outward to the nearest scene change. This decodes the video again around every boundary."
        )]
        snap: bool,

        #[clap(
            long,
            default_value_t = logo::DEFAULT_SNAP_MAX_DISTANCE.as_secs_f32(),
            value_parser = clap::value_parser!(f32),
            help = "Maximum distance a boundary is moved while snapping, in seconds."
        )]
        snap_max_distance: f32,

        #[clap(
            long,
            value_enum,
            help = "Write a cut list in the given format alongside each video file."
        )]
        cut_list: Option<CutList>,

        #[clap(
            long,
            default_value = "false",
            action(ArgAction::SetTrue),
            help = "Run the analysis step in-place instead of looking for pre-computed analysis data."
        )]
        analyze: bool,

        #[clap(
            long,
            default_value = "false",
            action(ArgAction::SetTrue),
            help = "Ignore result files on disk. These are JSON files that store the segments found for each video file."
        )]
        ignore_result_files: bool,

        #[clap(
            long,
            default_value = "false",
            action(ArgAction::SetTrue),
            help = "Do not write result files to disk after the search is completed."
        )]
        no_result_files: bool,

        #[clap(
            long,
            default_value = "false",
            action(ArgAction::SetTrue),
            help = "Do not display results of the search in stdout."
        )]
        no_display: bool,

        #[clap(flatten)]
        analysis: AnalysisArgs,
    },
}

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,

    #[clap(
        long,
        global = true,
        default_value = "false",
        action(ArgAction::SetTrue),
        help = "By default, video files are validated using FFmpeg, which is extremely accurate. Setting this flag will switch to just checking file headers."
    )]
    file_headers_only: bool,

    #[clap(
        long,
        global = true,
        default_value = "false",
        action(ArgAction::SetTrue),
        help = "Process videos in parallel."
    )]
    parallel: bool,

    #[clap(
        short,
        long,
        global = true,
        default_value = "false",
        action(ArgAction::SetTrue),
        help = "Enable debug logging."
    )]
    verbose: bool,
}

impl Cli {
    fn check(&self) -> Result<(), &'static str> {
        match &self.command {
            Commands::Info => Ok(()),
            Commands::Analyze { analysis, .. } => analysis.check(),
            Commands::Search {
                logo_threshold,
                snap_max_distance,
                analysis,
                ..
            } => {
                if !is_positive(*logo_threshold) {
                    return Err("logo_threshold must be a positive number");
                }
                if !is_non_negative(*snap_max_distance) {
                    return Err("snap_max_distance must be a non-negative number");
                }
                analysis.check()
            }
        }
    }

    fn validate(&self) {
        if let Err(msg) = self.check() {
            Cli::command().error(ErrorKind::InvalidValue, msg).exit();
        }
    }

    fn find_video_files(&self, paths: &[PathBuf]) -> Vec<PathBuf> {
        match bugwatch::util::find_video_files(paths, !self.file_headers_only) {
            Err(e) => {
                let mut cmd = Cli::command();
                cmd.error(ErrorKind::InvalidValue, e.to_string()).exit();
            }
            Ok(v) if v.is_empty() => {
                let mut cmd = Cli::command();
                cmd.error(
                    ErrorKind::InvalidValue,
                    "no valid video files found in provided paths",
                )
                .exit();
            }
            Ok(v) => v,
        }
    }
}

fn main() -> bugwatch::Result<()> {
    let args = Cli::parse();

    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(level)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    ffmpeg_next::init()?;

    args.validate();

    match args.command {
        Commands::Analyze {
            ref paths,
            ref analysis,
        } => {
            let videos = args.find_video_files(paths);
            let analyzer = analysis.analyzer(videos);
            analyzer.run(true, args.parallel)?;
        }
        Commands::Search {
            ref paths,
            logo_threshold,
            min_duration,
            snap,
            snap_max_distance,
            cut_list,
            analyze,
            ignore_result_files,
            no_result_files,
            no_display,
            ref analysis,
        } => {
            let videos = args.find_video_files(paths);
            let detector = logo::Detector::from_files(videos)
                .with_logo_threshold(logo_threshold)
                .with_min_duration(Duration::from_secs(min_duration.into()))
                .with_snap(snap)
                .with_snap_max_distance(Duration::from_secs_f32(snap_max_distance))
                .with_cut_list(cut_list.map(CutListFormat::from))
                .with_analyzer(analysis.analyzer(Vec::new()));
            detector.run(
                analyze,
                !no_display,
                !ignore_result_files,
                !no_result_files,
                args.parallel,
            )?;
        }
        Commands::Info => {
            println!("FFmpeg version: {}", bugwatch::util::ffmpeg_version_string());
            println!("Compute backend: {:?}", logo::ComputeBackend::select());
        }
    }

    Ok(())
}
