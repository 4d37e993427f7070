//! Terminal L4 target: the bottom of every route's middleware chain. Picks
//! an upstream via the route's load balancer and hands the connection to
//! the dialer/copier (§4.8 step 5).

use async_trait::async_trait;
use std::sync::Arc;

use crate::dial::{dial_and_copy, DefaultOnDialError, DialOptions};
use crate::lb::LoadBalancer;
use crate::middleware::{L4Context, L4Target};

pub struct DialTarget {
    pub route_name: String,
    pub lb: Arc<LoadBalancer>,
    pub dial_options: DialOptions,
}

#[async_trait]
impl L4Target for DialTarget {
    async fn handle(&self, ctx: L4Context) {
        ctx.meta.set_route_name(self.route_name.clone());
        let Some(addr) = self.lb.pick() else {
            log::warn!("route {} has no healthy targets", self.route_name);
            ctx.meta.finalize();
            return;
        };
        dial_and_copy(
            ctx.conn,
            ctx.client_local_addr,
            ctx.client_remote_addr,
            &addr,
            &self.dial_options,
            ctx.meta.clone(),
            ctx.cancel,
            &DefaultOnDialError,
        )
        .await;
        ctx.meta.finalize();
    }
}
