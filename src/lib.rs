//! camhub core
//!
//! Headless backend for a local camera fleet:
//!
//! 1. MetadataStore - cameras, recordings, schedules, encoder settings
//! 2. EncoderSelector - hardware encoder probing + CLI argument profiles
//! 3. OnvifClient - SOAP control plane (stream URI, PTZ, time sync)
//! 4. DiscoveryEngine - unicast WS-Discovery sweep over the local /24
//! 5. uvc - local capture device probing
//! 6. StreamSupervisor - transcoder children + HLS working directories
//! 7. RecordingManager - recorder children + MP4 finalization
//! 8. media_server - HLS/MP4/JPEG file routes
//! 9. ScheduleEngine - cron-driven recordings in Asia/Tokyo
//! 10. RealtimeHub - recording-finalized / stream-dead events
//! 11. web_api - the RPC surface the UI collaborator consumes

pub mod camera_locks;
pub mod child;
pub mod discovery;
pub mod encoder;
pub mod error;
pub mod media_server;
pub mod models;
pub mod onvif;
pub mod realtime_hub;
pub mod recording;
pub mod scheduler;
pub mod source;
pub mod state;
pub mod store;
pub mod stream_supervisor;
pub mod uvc;
pub mod web_api;

pub use error::{Error, Result};
pub use state::{AppConfig, AppState};
