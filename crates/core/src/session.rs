//! Meter session: configure once, then capture repeatedly.

use crate::error::{Error, Result};
use crate::protocol::{ConfigRequest, Measurement, Report};
use crate::transport::{receive, send, MeterTransport};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Total time allowed for the configure acknowledgement.
pub const CONFIG_ACK_TIMEOUT: Duration = Duration::from_millis(500);

/// An open meter plus the state of the exchange with it.
///
/// The session owns the transport exclusively; dropping it closes the device.
pub struct Session<T: MeterTransport> {
    transport: T,
    config: Option<ConfigRequest>,
}

impl<T: MeterTransport> Session<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            config: None,
        }
    }

    /// Settings applied by the last successful [`Session::configure`].
    pub fn config(&self) -> Option<&ConfigRequest> {
        self.config.as_ref()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send the configuration packet and wait for its acknowledgement.
    ///
    /// The acknowledgement only has to arrive as a full report within
    /// [`CONFIG_ACK_TIMEOUT`]; its content is not checked. Not retried.
    pub fn configure(&mut self, req: &ConfigRequest) -> Result<()> {
        self.config = None;
        let command = req.encode();
        debug!(
            range = req.range.label(),
            speed = req.speed.label(),
            weighting = req.weighting.label(),
            "Configuring meter"
        );

        send(&self.transport, &command)
            .map_err(|e| Error::ConfigRejected(format!("sending configuration: {e}")))?;

        let ack = receive(&self.transport, CONFIG_ACK_TIMEOUT).map_err(|e| {
            warn!("No configuration acknowledgement: {e}");
            Error::ConfigRejected(format!("no acknowledgement: {e}"))
        })?;
        debug!(ack = %ack, "Configuration acknowledged");

        info!(
            range = %req.range,
            speed = req.speed.label(),
            weighting = req.weighting.label(),
            "Meter configured"
        );
        self.config = Some(*req);
        Ok(())
    }

    /// Request and decode one measurement.
    ///
    /// A timeout is returned as [`Error::Timeout`] so a polling loop can
    /// carry on; every other failure becomes [`Error::CaptureFailed`].
    pub fn capture(&mut self, timeout: Duration) -> Result<Measurement> {
        if self.config.is_none() {
            return Err(Error::NotConfigured);
        }

        send(&self.transport, &Report::capture())
            .map_err(|e| Error::CaptureFailed(format!("sending capture request: {e}")))?;

        let report = receive(&self.transport, timeout).map_err(|e| match e {
            Error::Timeout(t) => Error::Timeout(t),
            other => Error::CaptureFailed(format!("reading capture response: {other}")),
        })?;

        let measurement = Measurement::decode(&report);
        if measurement.range.is_none() {
            warn!(report = %report, "Device reported an unknown range");
        }
        Ok(measurement)
    }
}
