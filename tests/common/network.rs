//! A "mock" (totally local) network for passing messages between nodes in one process.

use std::{
    collections::HashMap,
    sync::{
        mpsc::{self, Receiver, Sender, TryRecvError},
        Arc, Mutex,
    },
};

use rdpos_rs::{
    messages::Message,
    types::{bytes::Address, validator_set::ValidatorSet},
    Network,
};

/// A network stub that passes messages to and from nodes using channels.
///
/// Its `init_validator_set` and `update_validator_set` methods are no-ops, so the set of peers
/// reachable from a given `NetworkStub` is fixed on construction by [`mock_network`]. Tests that
/// grow the validator set must create the mock network with the extra addresses up front.
#[derive(Clone)]
pub(crate) struct NetworkStub {
    my_address: Address,
    all_peers: HashMap<Address, Sender<(Address, Message)>>,
    inbox: Arc<Mutex<Receiver<(Address, Message)>>>,
}

impl Network for NetworkStub {
    fn init_validator_set(&mut self, _: ValidatorSet) {}

    fn update_validator_set(&mut self, _: ValidatorSet) {}

    fn send(&mut self, peer: Address, message: Message) {
        if let Some(peer) = self.all_peers.get(&peer) {
            let _ = peer.send((self.my_address, message));
        }
    }

    fn broadcast(&mut self, message: Message) {
        for (peer, sender) in &self.all_peers {
            if *peer != self.my_address {
                let _ = sender.send((self.my_address, message.clone()));
            }
        }
    }

    fn recv(&mut self) -> Option<(Address, Message)> {
        match self.inbox.lock().unwrap().try_recv() {
            Ok(origin_and_msg) => Some(origin_and_msg),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => None,
        }
    }
}

/// Create a `NetworkStub` per peer, all connected to each other, in the order of `peers`.
pub(crate) fn mock_network(peers: impl Iterator<Item = Address>) -> Vec<NetworkStub> {
    let mut all_peers = HashMap::new();
    let peers_and_inboxes: Vec<(Address, Receiver<(Address, Message)>)> = peers
        .map(|peer| {
            let (sender, receiver) = mpsc::channel();
            all_peers.insert(peer, sender);
            (peer, receiver)
        })
        .collect();

    peers_and_inboxes
        .into_iter()
        .map(|(my_address, inbox)| NetworkStub {
            my_address,
            all_peers: all_peers.clone(),
            inbox: Arc::new(Mutex::new(inbox)),
        })
        .collect()
}
