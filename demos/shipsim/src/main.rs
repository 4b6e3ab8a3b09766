//! A toy ship simulation served over Helmlink.
//!
//! Demonstrates the full publish → re-evaluate → push cycle:
//!
//! - `navigation.course` is a live query: subscribe over the socket
//!   and every course change arrives without polling.
//! - `navigation.setCourse` is a mutation (also reachable via
//!   `POST /netSend`) that publishes to the course path.
//! - `ship.contacts` is a data stream: a little simulation loop moves
//!   two contacts in circles, and registered clients get binary
//!   snapshots every server tick.
//!
//! Try it:
//! ```text
//! cargo run -p shipsim
//! curl -X POST localhost:8081/netRequest -H 'content-type: application/json' \
//!     -d '{"path":"navigation.course"}'
//! curl -X POST localhost:8081/netSend -H 'content-type: application/json' \
//!     -d '{"path":"navigation.setCourse","heading":90,"speed":3}'
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use helmlink::prelude::*;
use helmlink_procedure::parser_for;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// The helm state behind `navigation.course`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Course {
    heading: f64,
    speed: f64,
}

/// Input contract for `navigation.setCourse`.
#[derive(Debug, Serialize, Deserialize)]
struct SetCourseInput {
    heading: f64,
    #[serde(default)]
    speed: f64,
}

/// Two contacts orbiting the origin; advanced by the simulation loop.
#[derive(Debug, Default)]
struct Contacts {
    angle: f32,
}

impl Contacts {
    fn advance(&mut self, dt: f32) {
        self.angle = (self.angle + dt * 0.4) % std::f32::consts::TAU;
    }

    fn entities(&self) -> serde_json::Value {
        let (sin, cos) = self.angle.sin_cos();
        json!([
            {
                "id": "freighter",
                "x": 120.0 * cos, "y": 0.0, "z": 120.0 * sin,
                "r": { "x": 0.0, "y": (self.angle / 2.0).sin(),
                       "z": 0.0, "w": (self.angle / 2.0).cos() },
            },
            {
                "id": "probe",
                "x": -40.0 * cos, "y": 10.0 * sin, "z": -40.0 * sin,
            },
        ])
    }
}

fn build_router(
    course: Arc<Mutex<Course>>,
    contacts: Arc<Mutex<Contacts>>,
    pubsub: Arc<PubSub>,
) -> Result<Router, HelmlinkError> {
    let course_read = Arc::clone(&course);
    let get_course = ProcedureBuilder::new().request(move |_| {
        let course = Arc::clone(&course_read);
        async move {
            let course = course.lock().unwrap().clone();
            Ok(serde_json::to_value(course)
                .map_err(|e| ProcedureError::failed(e.to_string()))?)
        }
    });

    let set_course = ProcedureBuilder::new()
        .input(parser_for::<SetCourseInput>())
        .send(move |call| {
            let course = Arc::clone(&course);
            let pubsub = Arc::clone(&pubsub);
            async move {
                let input: SetCourseInput =
                    serde_json::from_value(call.input.clone())
                        .map_err(|e| {
                            ProcedureError::failed(e.to_string())
                        })?;
                {
                    let mut course = course.lock().unwrap();
                    course.heading = input.heading;
                    course.speed = input.speed;
                }
                tracing::info!(
                    heading = input.heading,
                    speed = input.speed,
                    "course changed"
                );
                pubsub.publish("navigation.course", call.input.clone());
                Ok(json!({ "ok": true }))
            }
        });

    let contacts_stream =
        ProcedureBuilder::new().data_stream(move |_| {
            let contacts = Arc::clone(&contacts);
            async move { Ok(contacts.lock().unwrap().entities()) }
        });

    let navigation = Router::new(vec![
        ("course".to_string(), RouterNode::from(get_course)),
        ("setCourse".to_string(), RouterNode::from(set_course)),
    ])?;
    let ship = Router::new(vec![(
        "contacts".to_string(),
        RouterNode::from(contacts_stream),
    )])?;

    Ok(Router::new(vec![
        ("navigation".to_string(), RouterNode::from(navigation)),
        ("ship".to_string(), RouterNode::from(ship)),
    ])?)
}

#[tokio::main]
async fn main() -> Result<(), HelmlinkError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let course = Arc::new(Mutex::new(Course {
        heading: 0.0,
        speed: 0.0,
    }));
    let contacts = Arc::new(Mutex::new(Contacts::default()));
    let pubsub = Arc::new(PubSub::new());

    let router = build_router(
        Arc::clone(&course),
        Arc::clone(&contacts),
        Arc::clone(&pubsub),
    )?;

    // The simulation loop: advance the contacts at 10 Hz. Registered
    // data streams pick the fresh positions up on their own tick.
    let sim_contacts = Arc::clone(&contacts);
    tokio::spawn(async move {
        let mut tick =
            tokio::time::interval(Duration::from_millis(100));
        loop {
            tick.tick().await;
            sim_contacts.lock().unwrap().advance(0.1);
        }
    });

    let server = HelmlinkServer::builder()
        .bind_ws("127.0.0.1:8080")
        .bind_http("127.0.0.1:8081")
        .build(router, pubsub)
        .await?;

    tracing::info!("shipsim up: ws on :8080, http on :8081");
    server.run().await
}
