//! Shared fakes for the engine boundary plus request fixtures
#![allow(dead_code)]

use async_trait::async_trait;
use noise_orchestration::engine::{
    ConnectError, EngineConnection, EngineConnector, EngineLauncher, EngineProcess, RetryPolicy,
};
use noise_orchestration::{
    CalculationInput, GeometryNormalizer, NoiseError, NoisePipeline, PipelineDAG,
    PipelineSequencer, PropagationConfig, Result, Scenario,
};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Everything the fake engine saw
#[derive(Default)]
pub struct EngineRecord {
    statements: Mutex<Vec<String>>,
    pub launches: AtomicUsize,
    pub terminations: AtomicUsize,
    pub connect_attempts: AtomicU32,
    pub connections_closed: AtomicUsize,
}

/// In-process stand-in for the engine: launcher and connector in one
pub struct FakeEngine {
    pub record: Arc<EngineRecord>,
    fail_on: Option<String>,
    not_listening_for: u32,
    fatal_connect: bool,
    exit_during_boot: bool,
    document: Value,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            record: Arc::new(EngineRecord::default()),
            fail_on: None,
            not_listening_for: 0,
            fatal_connect: false,
            exit_during_boot: false,
            document: contour_document(),
        }
    }

    /// Reject the first statement containing `needle`
    pub fn failing_on(mut self, needle: &str) -> Self {
        self.fail_on = Some(needle.to_string());
        self
    }

    /// Refuse the first `attempts` connections as not listening
    pub fn not_listening_for(mut self, attempts: u32) -> Self {
        self.not_listening_for = attempts;
        self
    }

    pub fn with_fatal_connect(mut self) -> Self {
        self.fatal_connect = true;
        self
    }

    pub fn exiting_during_boot(mut self) -> Self {
        self.exit_during_boot = true;
        self
    }

    pub fn with_document(mut self, document: Value) -> Self {
        self.document = document;
        self
    }

    pub fn statements(&self) -> Vec<String> {
        self.record
            .statements
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    pub fn launches(&self) -> usize {
        self.record.launches.load(Ordering::SeqCst)
    }

    pub fn terminations(&self) -> usize {
        self.record.terminations.load(Ordering::SeqCst)
    }

    pub fn connect_attempts(&self) -> u32 {
        self.record.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn connections_closed(&self) -> usize {
        self.record.connections_closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EngineLauncher for FakeEngine {
    async fn launch(&self) -> Result<Box<dyn EngineProcess>> {
        self.record.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeProcess {
            record: self.record.clone(),
            exited: self.exit_during_boot,
        }))
    }
}

#[async_trait]
impl EngineConnector for FakeEngine {
    async fn connect(
        &self,
        _port: u16,
    ) -> std::result::Result<Box<dyn EngineConnection>, ConnectError> {
        let attempt = self.record.connect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fatal_connect {
            return Err(ConnectError::Fatal("authentication failed".to_string()));
        }
        if attempt <= self.not_listening_for {
            return Err(ConnectError::NotListening("connection refused".to_string()));
        }
        Ok(Box::new(RecordingConnection {
            record: self.record.clone(),
            fail_on: self.fail_on.clone(),
            document: self.document.clone(),
        }))
    }
}

pub struct FakeProcess {
    record: Arc<EngineRecord>,
    exited: bool,
}

#[async_trait]
impl EngineProcess for FakeProcess {
    fn id(&self) -> Option<u32> {
        Some(4242)
    }

    fn port(&self) -> u16 {
        5435
    }

    fn try_exit_status(&mut self) -> Option<String> {
        self.exited.then(|| "exit status: 1".to_string())
    }

    async fn terminate(&mut self) -> Result<()> {
        self.record.terminations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct RecordingConnection {
    record: Arc<EngineRecord>,
    fail_on: Option<String>,
    document: Value,
}

#[async_trait]
impl EngineConnection for RecordingConnection {
    async fn execute(&mut self, statement: &noise_orchestration::Statement) -> Result<()> {
        let sql = statement.sql();
        if let Some(needle) = &self.fail_on {
            if sql.contains(needle.as_str()) {
                return Err(NoiseError::Other(anyhow::anyhow!(
                    "engine rejected statement: {}",
                    needle
                )));
            }
        }
        if let Ok(mut statements) = self.record.statements.lock() {
            statements.push(sql);
        }
        Ok(())
    }

    async fn read_geojson(&mut self, _path: &Path) -> Result<Value> {
        Ok(self.document.clone())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.record.connections_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn sequencer(engine: &Arc<FakeEngine>) -> PipelineSequencer {
    let dag = PipelineDAG::noise_pipeline(5_000).expect("noise pipeline DAG");
    PipelineSequencer::with_default_handlers(
        dag,
        engine.clone(),
        engine.clone(),
        RetryPolicy::immediate(3),
    )
}

pub fn pipeline(engine: &Arc<FakeEngine>, export_dir: PathBuf) -> NoisePipeline {
    NoisePipeline::new(
        GeometryNormalizer::new(1).expect("normalizer pool"),
        sequencer(engine),
        PropagationConfig::default(),
        export_dir,
    )
}

/// Position of the first statement containing `needle`
pub fn position(statements: &[String], needle: &str) -> Option<usize> {
    statements.iter().position(|s| s.contains(needle))
}

fn road(id: i64, coordinates: Value, adjustable: bool) -> Value {
    json!({
        "type": "Feature",
        "properties": {
            "id": id,
            "road_type": "boulevard",
            "car_traffic_daily": 1000,
            "truck_traffic_daily": 200,
            "max_speed": 50,
            "traffic_settings_adjustable": adjustable
        },
        "geometry": {"type": "LineString", "coordinates": coordinates}
    })
}

/// One building next to one adjustable boulevard, overrides 30 km/h and 50 %
pub fn request() -> Value {
    json!({
        "max_speed": 30,
        "traffic_quota": 50,
        "buildings": {
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "properties": {},
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[
                        [10.0, 53.54], [10.001, 53.54], [10.001, 53.541], [10.0, 53.541], [10.0, 53.54]
                    ]]
                }
            }]
        },
        "roads": {
            "type": "FeatureCollection",
            "features": [road(7, json!([[9.999, 53.539], [10.002, 53.539]]), true)]
        }
    })
}

/// Request with a second road sharing an endpoint with the first
pub fn two_road_request() -> Value {
    let mut raw = request();
    raw["roads"]["features"]
        .as_array_mut()
        .expect("features array")
        .push(road(8, json!([[10.002, 53.539], [10.003, 53.5395]]), false));
    raw
}

pub fn input(raw: Value) -> CalculationInput {
    CalculationInput::from_json(raw).expect("valid request")
}

pub fn scenario(raw: Value) -> Scenario {
    Scenario::from_input(&input(raw)).expect("valid scenario")
}

fn square(x0: f64, y0: f64, size: f64) -> Value {
    json!({
        "type": "Polygon",
        "coordinates": [[
            [x0, y0], [x0 + size, y0], [x0 + size, y0 + size], [x0, y0 + size], [x0, y0]
        ]]
    })
}

/// Contour document as the engine exports it: one iso band over the
/// building, one far away from it
pub fn contour_document() -> Value {
    json!({
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "properties": {"idiso": 3, "cell_id": 0},
                "geometry": square(10.0002, 53.5402, 0.0005)
            },
            {
                "type": "Feature",
                "properties": {"idiso": 5, "cell_id": 1},
                "geometry": square(11.0, 54.0, 0.01)
            }
        ]
    })
}
