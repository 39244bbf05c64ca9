//! Panic recovery
//!
//! Turns a panic anywhere further down the chain into a 500 error so one
//! bad handler cannot take the connection task with it.

use crate::{Skipper, skipped};
use futures_util::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::error;
use trellis_core::{Context, Error, MiddlewareFunc};

#[derive(Clone)]
pub struct RecoverConfig {
    pub skipper: Option<Skipper>,
    /// Log the panic message. On by default.
    pub log_panics: bool,
}

impl Default for RecoverConfig {
    fn default() -> Self {
        Self {
            skipper: None,
            log_panics: true,
        }
    }
}

impl RecoverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skipper<F>(mut self, skipper: F) -> Self
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        self.skipper = Some(Arc::new(skipper));
        self
    }

    pub fn log_panics(mut self, enabled: bool) -> Self {
        self.log_panics = enabled;
        self
    }
}

impl fmt::Debug for RecoverConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoverConfig")
            .field("skipper", &self.skipper.is_some())
            .field("log_panics", &self.log_panics)
            .finish()
    }
}

pub fn recover() -> MiddlewareFunc {
    recover_with(RecoverConfig::default())
}

pub fn recover_with(config: RecoverConfig) -> MiddlewareFunc {
    let config = Arc::new(config);
    MiddlewareFunc::from_fn(move |c, next| {
        let config = config.clone();
        Box::pin(async move {
            if skipped(&config.skipper, c) {
                return next.call(c).await;
            }

            let outcome = AssertUnwindSafe(next.call(c)).catch_unwind().await;
            match outcome {
                Ok(result) => result,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    if config.log_panics {
                        error!(
                            method = %c.method(),
                            path = %c.request().uri().path(),
                            panic = %message,
                            "PANIC RECOVER"
                        );
                    }
                    Err(Error::internal(message))
                }
            }
        })
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
