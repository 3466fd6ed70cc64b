//! Bus metrics endpoint.
//!
//! `GET` replies with the postcard-encoded [`BusStats`](crate::bus::BusStats)
//! snapshot. Not gated: the counters carry no secrets.

use log::warn;

use crate::bus::{Endpoint, EndpointId, Outcome, Request};

use super::EP_METRICS;

const CMD_GET: u8 = 0x01;

pub struct MetricsEndpoint;

impl Endpoint for MetricsEndpoint {
    fn id(&self) -> EndpointId {
        EP_METRICS
    }

    fn name(&self) -> &'static str {
        "metrics"
    }

    fn handle(&self, request: &mut Request<'_>) -> Outcome {
        let Some(&cmd) = request.payload().first() else {
            return Outcome::Incomplete;
        };
        match cmd {
            CMD_GET => {
                let stats = request.bus().stats();
                let bytes = match postcard::to_allocvec(&stats) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!("METRICS[{}]: encode failed: {}", request.session(), e);
                        return Outcome::Error;
                    }
                };
                if request.reply(&bytes) {
                    Outcome::Ok
                } else {
                    Outcome::Error
                }
            }
            _ => Outcome::Unknown,
        }
    }
}
