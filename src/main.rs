use std::process;
use std::time::Duration;

use clap::{Arg, ArgAction, Command, value_parser};
use log::{error, info};

use media_handoff::PipelineConfig;
use media_handoff::config::{app_name, version};
use media_handoff::media::synthetic::{
    NullAudioOutput, PassthroughVideoDecoder, PcmAudioDecoder, RecordingRenderer, SyntheticSource,
};
use media_handoff::pipeline::{MediaComponents, PlaybackCoordinator};

fn cli() -> Command {
    Command::new(app_name())
        .version(version())
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("JSON pipeline configuration; missing fields keep their defaults."),
        )
        .arg(
            Arg::new("video-frames")
                .long("video-frames")
                .value_name("COUNT")
                .help("Number of synthetic video packets.")
                .value_parser(value_parser!(usize))
                .default_value("250"),
        )
        .arg(
            Arg::new("audio-packets")
                .long("audio-packets")
                .value_name("COUNT")
                .help("Number of synthetic audio packets.")
                .value_parser(value_parser!(usize))
                .default_value("500"),
        )
        .arg(
            Arg::new("audio-packet-bytes")
                .long("audio-packet-bytes")
                .value_name("BYTES")
                .help("PCM bytes carried by each audio packet.")
                .value_parser(value_parser!(usize))
                .default_value("3528"),
        )
        .arg(
            Arg::new("foreign-every")
                .long("foreign-every")
                .value_name("N")
                .help("Insert a packet of an unrouted stream after every N packets.")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("frame-queue")
                .long("frame-queue")
                .value_name("FRAMES")
                .help("Bound the decoded frame queue (overrides the configuration).")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("ring-capacity")
                .long("ring-capacity")
                .value_name("BYTES")
                .help("Audio ring size (overrides the configuration).")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("realtime")
                .short('r')
                .long("realtime")
                .help("Pace rendering at 25 fps and audio at the device period.")
                .action(ArgAction::SetTrue),
        )
}

fn main() {
    tracing_subscriber::fmt::init();

    let matches = cli().get_matches();

    let mut config = match matches.get_one::<String>("config") {
        Some(path) => match PipelineConfig::from_json_file(path) {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load {}: {}", path, e);
                process::exit(2);
            }
        },
        None => PipelineConfig::default(),
    };
    if let Some(frames) = matches.get_one::<usize>("frame-queue") {
        config.frame_queue_capacity = Some(*frames);
    }
    if let Some(capacity) = matches.get_one::<usize>("ring-capacity") {
        config.audio_ring_capacity = *capacity;
    }

    let video_frames = matches.get_one::<usize>("video-frames").copied().unwrap_or(250);
    let audio_packets = matches.get_one::<usize>("audio-packets").copied().unwrap_or(500);
    let audio_packet_bytes = matches
        .get_one::<usize>("audio-packet-bytes")
        .copied()
        .unwrap_or(3528);
    let realtime = matches.get_flag("realtime");

    let mut coordinator = match PlaybackCoordinator::new(config.clone()) {
        Ok(coordinator) => coordinator,
        Err(e) => {
            error!("{}", e);
            process::exit(2);
        }
    };

    // gracefully stop the playback when receiving SIGINT, SIGTERM, or SIGHUP
    let sos = coordinator.stop_signal();
    if let Err(e) = ctrlc::set_handler(move || {
        if sos.cancel() {
            info!("Stop requested, winding down the pipeline");
        }
    }) {
        error!("Error setting Ctrl-C handler: {}", e);
    }

    let mut source = SyntheticSource::new(video_frames, audio_packets, audio_packet_bytes);
    if let Some(every) = matches.get_one::<usize>("foreign-every") {
        source = source.with_foreign_packets(*every);
    }

    let mut renderer = RecordingRenderer::new();
    let mut audio_output = NullAudioOutput::new();
    if realtime {
        renderer = renderer.with_frame_time(Duration::from_millis(40));
        audio_output = audio_output.paced(config.audio.period_duration());
    }

    let components = MediaComponents {
        source: Box::new(source),
        video_decoder: Box::new(PassthroughVideoDecoder::new(1280, 720)),
        audio_decoder: Box::new(PcmAudioDecoder),
        renderer: Box::new(renderer),
        audio_output: Box::new(audio_output),
    };

    if let Err(e) = coordinator.launch(components) {
        error!("Failed to launch the pipeline: {:#}", e);
        process::exit(1);
    }

    match coordinator.wait() {
        Ok(report) if report.success => {}
        Ok(report) if report.stopped => process::exit(130),
        Ok(_) => process::exit(1),
        Err(e) => {
            error!("{:#}", e);
            process::exit(1);
        }
    }
}
