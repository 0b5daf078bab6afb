use std::collections::HashMap;
use std::sync::Arc;

use palisade_consensus::Transport;
use palisade_core::{ClientRequest, Message, PublicKey};
use palisade_rpc::{RequestGateway, ResponseCollector};
use tokio::sync::mpsc;
use tracing::debug;

use crate::replica::ReplicaEvent;

/// In-process routing table of a local cluster
pub struct Routes {
    replicas: HashMap<PublicKey, mpsc::UnboundedSender<ReplicaEvent>>,
    /// The RPC client's identity; responses to it go to the collector
    client: PublicKey,
    collector: Arc<ResponseCollector>,
}

impl Routes {
    pub fn new(
        replicas: HashMap<PublicKey, mpsc::UnboundedSender<ReplicaEvent>>,
        client: PublicKey,
        collector: Arc<ResponseCollector>,
    ) -> Self {
        Routes {
            replicas,
            client,
            collector,
        }
    }

    fn deliver(&self, from: PublicKey, to: &PublicKey, msg: Message) {
        if let Some(queue) = self.replicas.get(to) {
            if queue.send(ReplicaEvent::Message { from, msg }).is_err() {
                debug!("Replica {} stopped, dropping message", to.short());
            }
            return;
        }

        if *to == self.client {
            match msg {
                Message::ClientResponse(response) => {
                    self.collector.deliver(response);
                }
                other => debug!("Client ignores {:?}", other.kind()),
            }
            return;
        }

        debug!("No route to {}", to.short());
    }
}

/// Transport of one replica over the cluster's channels
pub struct ChannelTransport {
    me: PublicKey,
    routes: Arc<Routes>,
}

impl ChannelTransport {
    pub fn new(me: PublicKey, routes: Arc<Routes>) -> Self {
        ChannelTransport { me, routes }
    }
}

impl Transport for ChannelTransport {
    fn send(&self, to: &PublicKey, msg: Message) {
        self.routes.deliver(self.me, to, msg);
    }
}

/// Hands RPC submissions to every replica of the local cluster
pub struct ChannelGateway {
    routes: Arc<Routes>,
}

impl ChannelGateway {
    pub fn new(routes: Arc<Routes>) -> Self {
        ChannelGateway { routes }
    }
}

impl RequestGateway for ChannelGateway {
    fn submit(&self, request: &ClientRequest) {
        for replica in self.routes.replicas.keys() {
            self.routes.deliver(
                self.routes.client,
                replica,
                Message::ClientRequest(request.clone()),
            );
        }
    }
}
