use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use geo_anchor_rs::config::NavConfig;
use geo_anchor_rs::error::NavResult;
use geo_anchor_rs::geo_math;
use geo_anchor_rs::provider::sensors::{heading_loop, location_loop, WalkPath};
use geo_anchor_rs::provider::{ChannelSource, ProviderStatus, SensorSample};
use geo_anchor_rs::route::{
    CustomRoute, LoadedRoute, MapboxClient, RouteLoader, RouteSettings, RouteWaypoint, TargetChange,
};
use geo_anchor_rs::status::NavigationStatus;
use geo_anchor_rs::types::{yaw_rotation, GeoPoint, LocalPoint};
use geo_anchor_rs::Session;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use tokio::sync::mpsc::{self, Sender};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Instant};

/// Yaw between the simulated AR world's +z axis and true north
const AR_WORLD_YAW_DEG: f64 = 25.0;

#[derive(Parser, Debug)]
#[command(name = "geo_anchor")]
#[command(about = "Walk a simulated user along a route and drive the AR navigation engine", long_about = None)]
struct Args {
    /// Custom route file (JSON)
    #[arg(long, conflicts_with_all = ["from", "to"])]
    route: Option<PathBuf>,

    /// Route start: "lat,lon" or a place name
    #[arg(long, requires = "to")]
    from: Option<String>,

    /// Route end: "lat,lon" or a place name
    #[arg(long, requires = "from")]
    to: Option<String>,

    /// Mapbox access token (falls back to MAPBOX_TOKEN)
    #[arg(long)]
    token: Option<String>,

    /// Walking speed in m/s
    #[arg(long, default_value = "1.4")]
    speed: f64,

    /// Duration in seconds (0 = until the walk ends)
    #[arg(long, default_value = "0")]
    duration: u64,

    /// Tick period in milliseconds
    #[arg(long, default_value = "33")]
    tick_ms: u64,

    /// Write a JSON status snapshot here every second
    #[arg(long)]
    status_file: Option<PathBuf>,

    /// Configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Read real fixes from termux-location when available
    #[arg(long)]
    termux: bool,
}

type PendingLoad<'a> = Pin<Box<dyn Future<Output = NavResult<LoadedRoute>> + 'a>>;

/// Producer tasks feeding the session's channel source
struct Walker {
    tx: Sender<SensorSample>,
    walk: WalkPath,
    started: Instant,
    termux: bool,
    tasks: Vec<JoinHandle<()>>,
}

impl Walker {
    fn new(tx: Sender<SensorSample>, walk: WalkPath, termux: bool) -> Self {
        let mut walker = Walker {
            tx,
            walk: walk.clone(),
            started: Instant::now(),
            termux,
            tasks: Vec::new(),
        };
        walker.set_walk(walk);
        walker
    }

    /// Restart the producers on a new path.
    fn set_walk(&mut self, walk: WalkPath) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.tasks.push(tokio::spawn(location_loop(
            self.tx.clone(),
            walk.clone(),
            Duration::from_secs(1),
            self.termux,
        )));
        self.tasks.push(tokio::spawn(heading_loop(
            self.tx.clone(),
            walk.clone(),
            Duration::from_millis(100),
        )));
        self.walk = walk;
        self.started = Instant::now();
    }

    fn elapsed(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}

impl Drop for Walker {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn poll_pending(pending: &mut Option<PendingLoad<'_>>) -> NavResult<LoadedRoute> {
    match pending {
        Some(load) => load.await,
        None => std::future::pending().await,
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => NavConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => NavConfig::default(),
    };
    if let Some(token) = args.token.clone().or_else(|| std::env::var("MAPBOX_TOKEN").ok()) {
        config.route.mapbox_token = token;
    }
    if args.speed <= 0.0 {
        bail!("--speed must be positive");
    }

    println!("[{}] geo_anchor starting", ts_now());
    println!("  Speed: {:.1} m/s", args.speed);
    println!("  Duration: {} seconds (0=until the walk ends)", args.duration);
    println!("  Tick: {} ms", args.tick_ms);

    let loader = RouteLoader::new(MapboxClient::new(&config.route));

    // Route source and the path the simulated user starts on
    let (settings, initial_walk) = match (&args.route, &args.from, &args.to) {
        (Some(path), _, _) => {
            let route = CustomRoute::load(path).with_context(|| format!("loading {}", path.display()))?;
            let points = route.points.iter().map(|p| p.location).collect();
            println!("  Route: {} ({} points)", path.display(), route.points.len());
            (RouteSettings::Custom(route), WalkPath::new(points, args.speed))
        }
        (None, Some(from), Some(to)) => {
            let from: RouteWaypoint = from.parse()?;
            let to: RouteWaypoint = to.parse()?;
            if from == RouteWaypoint::UserLocation {
                bail!("the simulator has no live start location; pass coordinates or a place name to --from");
            }
            let start = loader.resolve(&from, None).await?;
            println!("  Route: {:?} -> {:?}", from, to);
            (RouteSettings::Mapbox { from, to }, WalkPath::new(vec![start], args.speed))
        }
        _ => bail!("either --route or --from/--to is required"),
    };

    let (tx, rx) = mpsc::channel(256);
    let mut walker = Walker::new(tx, initial_walk, args.termux);
    let mut session = Session::new(Box::new(ChannelSource::new(rx)), config);
    session.provider().borrow_mut().failed.subscribe(|message: &String| {
        log::error!("location provider failed: {}", message);
    });
    session.route_mut().target_changed.subscribe(|change: &TargetChange| {
        println!("[{}] Target -> step {}", ts_now(), change.current + 1);
    });
    session.route_mut().route_error.subscribe(|message: &String| {
        println!("[{}] Route error: {}", ts_now(), message);
    });

    if session.start().await != ProviderStatus::Started {
        bail!("location provider did not start");
    }
    session.set_tracking(true);

    let tick = Duration::from_millis(args.tick_ms.max(1));
    let mut ticker = interval(tick);
    let mut status_ticker = interval(Duration::from_secs(1));
    let run_started = Instant::now();
    let mut last_tick = Instant::now();
    let mut pending: Option<PendingLoad<'_>> = None;
    let mut route_requested = false;
    let mut origin: Option<GeoPoint> = None;
    let eye_height = session.config().route.ground_height;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Instant::now();
                let dt = (now - last_tick).as_secs_f64();
                last_tick = now;

                if let Some((position, bearing)) = walker.walk.pose_at(walker.elapsed()) {
                    let origin = *origin.get_or_insert(position);
                    let camera = camera_position(&origin, &position, eye_height);
                    session.set_camera(camera, bearing + AR_WORLD_YAW_DEG);
                }
                session.tick(dt);

                for (step, effect) in session.route_mut().take_effects() {
                    log::debug!("step {}: {:?}", step, effect);
                }

                let enabled = session.provider().borrow().is_enabled();
                if !route_requested && enabled && session.config().route.load_route_at_startup {
                    route_requested = true;
                    match &settings {
                        RouteSettings::Custom(route) => {
                            session.route_mut().load_custom_route(route.clone());
                        }
                        RouteSettings::Mapbox { .. } => {
                            let user = session.route().user_location();
                            let settings = settings.clone();
                            let loader = &loader;
                            pending = Some(Box::pin(async move { loader.load_settings(&settings, user).await }));
                        }
                    }
                }
            }
            result = poll_pending(&mut pending), if pending.is_some() => {
                pending = None;
                if session.route_mut().finish_load(settings.clone(), result) {
                    let route = session.route();
                    println!("[{}] Route ready: {} steps, {:.0} m", ts_now(), route.number_of_steps(), route.route_distance());
                    if !route.geometry().is_empty() {
                        walker.set_walk(WalkPath::new(route.geometry().to_vec(), args.speed));
                    }
                }
            }
            _ = status_ticker.tick() => {
                let status = NavigationStatus::capture(&session);
                log::info!(
                    "yaw {:.1} | target {:?}/{} | {:.1} m to go",
                    status.root_yaw_deg,
                    status.current_target.map(|i| i + 1),
                    status.route_steps,
                    status.distance_to_target.unwrap_or(0.0)
                );
                if let Some(path) = &args.status_file {
                    if let Err(e) = status.save(path) {
                        log::warn!("could not write {}: {}", path.display(), e);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("[{}] Interrupted", ts_now());
                break;
            }
        }

        let elapsed = run_started.elapsed().as_secs_f64();
        if args.duration > 0 && elapsed >= args.duration as f64 {
            break;
        }
        let route_done = session.route().number_of_steps() > 0 && walker.elapsed() > walker.walk.duration_secs() + 5.0;
        if args.duration == 0 && pending.is_none() && route_done {
            break;
        }
    }

    let status = NavigationStatus::capture(&session);
    if let Some(path) = &args.status_file {
        status.save(path)?;
    }
    println!(
        "[{}] Done: target {:?} of {}, root yaw {:.1}",
        ts_now(),
        status.current_target.map(|i| i + 1),
        status.route_steps,
        status.root_yaw_deg
    );
    Ok(())
}

/// Simulated AR camera: the walk's offset from `origin`, turned into a world
/// frame that is rotated away from north.
fn camera_position(origin: &GeoPoint, position: &GeoPoint, eye_height: f64) -> LocalPoint {
    let enu = geo_math::enu_vector(origin, position);
    yaw_rotation(AR_WORLD_YAW_DEG) * LocalPoint::new(enu.x, eye_height, enu.y)
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}
