use std::{io::Write, sync::Arc, thread, time::Duration};

use crate::{
    env::Config,
    error::{CommandError, RelayError},
    hub::{Device, Event, EventKind, Hub},
    messages::{Command, Vbr},
    relay::Relay,
    sequencer::Sequencer,
    shutdown::Shutdown,
    transport::Transport,
};

/// Extra attempts for a landing whose send failed.
const LAND_RETRIES: u32 = 3;
const LAND_RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// Action that sends `command`, logging instead of failing. A transport
/// failure is retried up to `retries` more times; a session that is not
/// connected, or a lost link, is not.
fn send_action<T: Transport>(
    device: &Device<T>,
    command: Command,
    retries: u32,
) -> impl Fn() + Send + Sync {
    let device = device.clone();
    move || {
        for attempt in 0..=retries {
            if attempt > 0 {
                thread::sleep(LAND_RETRY_BACKOFF);
            }
            match device.send(command) {
                Ok(()) if command == Command::StartVideo => return,
                Ok(()) => {
                    tracing::info!(command = command.name(), attempt, "tello command sent");
                    return;
                }
                Err(CommandError::NotConnected) => {
                    tracing::debug!(command = command.name(), "not connected, skipped");
                    return;
                }
                Err(e @ CommandError::LinkLost(_)) => {
                    tracing::error!(command = command.name(), "{}", e);
                    return;
                }
                Err(e) => tracing::warn!(command = command.name(), attempt, "{}", e),
            }
        }
        if retries > 0 {
            tracing::error!(command = command.name(), retries, "giving up");
        }
    }
}

/// Keepalive from the first tick, take off, hover, land.
pub fn flight_plan<T: Transport>(device: &Device<T>, config: &Config, shutdown: Shutdown) -> Sequencer {
    Sequencer::new(shutdown)
        .every(
            "keepalive",
            config.keepalive_period,
            send_action(device, Command::StartVideo, 0),
        )
        .once(
            "takeoff",
            config.takeoff_delay,
            send_action(device, Command::TakeOff, 0),
        )
        .once(
            "land",
            config.land_delay,
            send_action(device, Command::Land, LAND_RETRIES),
        )
}

/// Hooks the relay and the flight plan to the hub's events. Must run before
/// [`Hub::connect`].
pub fn register_handlers<T, W>(hub: &mut Hub<T>, relay: Arc<Relay<W>>, sequencer: Arc<Sequencer>)
where
    T: Transport,
    W: Write + Send + 'static,
{
    let device = hub.device();
    hub.on(EventKind::Connected, move |_| {
        let method_name = "on_connected";
        for command in [
            Command::StartVideo,
            Command::SetVideoBitrate(Vbr::Auto),
            Command::SetExposure(0),
        ] {
            if let Err(e) = device.send(command) {
                tracing::warn!(method_name, "{}", e);
            }
        }
        sequencer.start();
    });

    hub.on(EventKind::VideoFrame, move |event| {
        let method_name = "on_video";
        let Event::VideoFrame(packet) = event else {
            return;
        };
        match relay.forward(packet) {
            Ok(()) => {}
            Err(RelayError::Closed) => tracing::trace!(method_name, "relay closed, packet dropped"),
            Err(e) => tracing::warn!(method_name, "{}", e),
        }
    });

    hub.on(EventKind::Disconnected, |_| {
        tracing::warn!("tello link is down");
    });

    hub.on(EventKind::Error, |event| {
        if let Event::Error(reason) = event {
            tracing::warn!("tello link error: {}", reason);
        }
    });
}

#[cfg(test)]
mod tests {
    use std::{
        sync::Mutex,
        thread,
        time::{Duration, Instant},
    };

    use super::*;
    use crate::{messages::TelloPacket, transport::mock::MockTransport};

    #[derive(Clone, Default)]
    struct SharedPipe(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedPipe {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn test_config() -> Config {
        Config {
            tello_addr: "127.0.0.1".to_owned(),
            ctrl_port: 8889,
            video_port: 6038,
            frame_width: 2,
            frame_height: 2,
            takeoff_delay: Duration::from_millis(100),
            land_delay: Duration::from_millis(250),
            keepalive_period: Duration::from_millis(20),
            handshake_timeout: Duration::from_secs(2),
            io_timeout: Duration::from_millis(50),
            transcoder: "cat".to_owned(),
            player: "true".to_owned(),
        }
    }

    fn sent_ids(transport: &MockTransport) -> Vec<u16> {
        transport
            .sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|b| TelloPacket::from_buffer(b).ok())
            .map(|p| p.message_id)
            .collect()
    }

    #[test]
    fn test_connected_flight_and_video() {
        const SPSPPS: u16 = 0x25;
        const VBR: u16 = 0x20;
        const EXPOSURE: u16 = 0x34;
        const TAKEOFF: u16 = 0x54;
        const LAND: u16 = 0x55;

        let config = test_config();
        let shutdown = Shutdown::new();
        let (transport, drone) = MockTransport::new();
        drone.ctrl.send(b"conn_ack:\x96\x17".to_vec()).unwrap();
        let mut hub = Hub::new(transport, shutdown.clone());
        let device = hub.device();

        let pipe = SharedPipe::default();
        let relay = Arc::new(Relay::new(pipe.clone()));
        let sequencer = Arc::new(flight_plan(&device, &config, shutdown.clone()));
        register_handlers(&mut hub, relay.clone(), sequencer.clone());
        assert!(!sequencer.is_started());

        let session = hub.connect(config.handshake_timeout).expect("handshake");
        drone.video.send(vec![0, 0, 5, 6]).unwrap();
        drone.video.send(vec![0, 1, 7]).unwrap();

        let deadline = Instant::now() + Duration::from_secs(3);
        while !sent_ids(device.transport()).contains(&LAND) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        thread::sleep(Duration::from_millis(60));
        shutdown.trigger();
        sequencer.join();
        session.close();

        let ids = sent_ids(device.transport());
        assert_eq!(vec![SPSPPS, VBR, EXPOSURE], ids[..3].to_vec());
        let takeoff = ids.iter().position(|id| *id == TAKEOFF).expect("takeoff sent");
        let land = ids.iter().position(|id| *id == LAND).expect("land sent");
        assert!(takeoff < land);
        assert_eq!(1, ids.iter().filter(|id| **id == TAKEOFF).count());
        assert_eq!(1, ids.iter().filter(|id| **id == LAND).count());
        assert!(ids[3..takeoff].iter().all(|id| *id == SPSPPS));
        assert!(ids[3..takeoff].len() >= 2);
        assert!(ids[land..].contains(&SPSPPS));

        assert_eq!(vec![5, 6, 7], *pipe.0.lock().unwrap());
        assert_eq!(2, relay.forwarded());
    }

    #[test]
    fn test_failed_land_is_retried() {
        const LAND: u16 = 0x55;

        let shutdown = Shutdown::new();
        let (transport, drone) = MockTransport::new();
        drone.ctrl.send(b"conn_ack:\x96\x17".to_vec()).unwrap();
        let session = Hub::new(transport, shutdown.clone())
            .connect(Duration::from_secs(2))
            .expect("handshake");
        let device = session.device();

        *device.transport().fail_sends.lock().unwrap() = 2;
        send_action(&device, Command::Land, LAND_RETRIES)();
        assert_eq!(vec![LAND], sent_ids(device.transport()));
        assert!(device.is_connected());

        // takeoff is not retried
        *device.transport().fail_sends.lock().unwrap() = 1;
        send_action(&device, Command::TakeOff, 0)();
        assert_eq!(vec![LAND], sent_ids(device.transport()));

        // out of retries
        *device.transport().fail_sends.lock().unwrap() = LAND_RETRIES + 1;
        send_action(&device, Command::Land, LAND_RETRIES)();
        assert_eq!(vec![LAND], sent_ids(device.transport()));
        assert_eq!(0, *device.transport().fail_sends.lock().unwrap());

        shutdown.trigger();
        session.close();
    }
}
