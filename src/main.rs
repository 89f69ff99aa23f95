use std::sync::Arc;

use tello_autopilot::{
    autopilot,
    env::{self, Config},
    frame::FramePool,
    hub::Hub,
    player::PlayerWindow,
    relay::{FrameReader, Relay},
    shutdown::Shutdown,
    sink::FrameSink,
    transcoder::{self, Transcoder, TranscoderPipes},
    transport::UdpTransport,
};

const IDLE_FRAME_BUFFERS: usize = 8;

pub fn main() -> tello_autopilot::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(*env::ENV_TELLO_LOG_LEVEL)
        .init();

    let config = Config::from_env();
    tracing::info!(?config, "starting tello autopilot");
    let shutdown = Shutdown::new();

    // no video path without the transcoder, so nothing flies without it either
    let args = transcoder::transcoder_args(config.frame_width, config.frame_height);
    let (transcoder, pipes) = Transcoder::start(&config.transcoder, &args).map_err(|e| {
        tracing::error!("{}", e);
        e
    })?;
    let supervisor = transcoder.supervise(shutdown.clone());

    let r = run(&config, &shutdown, pipes);
    if let Err(ref e) = r {
        tracing::error!("{}", e);
    }
    shutdown.trigger();
    match supervisor.join() {
        Ok(Some(e)) => tracing::warn!("video path ended early: {}", e),
        Ok(None) => {}
        Err(_) => tracing::error!("transcoder supervisor panicked"),
    }
    tracing::info!("tello autopilot finished");
    r
}

fn run(config: &Config, shutdown: &Shutdown, pipes: TranscoderPipes) -> tello_autopilot::Result<()> {
    let pool = FramePool::new(config.frame_size(), IDLE_FRAME_BUFFERS);
    let (frame_tx, frame_rx) = tello_autopilot::frame_channel(IDLE_FRAME_BUFFERS);
    let reader = FrameReader::new(
        pipes.output,
        config.frame_width,
        config.frame_height,
        pool.clone(),
        frame_tx,
        shutdown.clone(),
    )
    .spawn();
    let relay = Arc::new(Relay::new(pipes.input));

    let window = PlayerWindow::open(&config.player, config.frame_width, config.frame_height)?;
    let mut hub = Hub::new(UdpTransport::bind(config)?, shutdown.clone());
    let sequencer = Arc::new(autopilot::flight_plan(
        &hub.device(),
        config,
        shutdown.clone(),
    ));
    autopilot::register_handlers(&mut hub, relay, sequencer.clone());
    let session = hub.connect(config.handshake_timeout)?;

    // the window belongs to this thread only
    let mut sink = FrameSink::new(window, frame_rx, pool, shutdown.clone());
    sink.run();

    shutdown.trigger();
    sequencer.join();
    session.close();
    sink.into_display().close();
    match reader.join() {
        Ok(stats) => tracing::info!(
            delivered = stats.delivered,
            discarded = stats.discarded,
            dropped = stats.dropped,
            "video relay finished"
        ),
        Err(_) => tracing::error!("frame reader panicked"),
    }
    Ok(())
}
