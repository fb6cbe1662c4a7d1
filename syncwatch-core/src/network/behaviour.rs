//! libp2p Network Behaviour
//!
//! The peer data channel. Peers find each other through the signaling store
//! (or mDNS on the local network), dial each other directly over TCP or QUIC
//! and exchange sync messages on a per-room gossipsub topic.

use std::collections::HashSet;
use std::time::Duration;

use futures::StreamExt;
use libp2p::{
    gossipsub, identify, identity, mdns, noise, ping,
    swarm::{behaviour::toggle::Toggle, NetworkBehaviour, SwarmEvent},
    tcp, yamux, Multiaddr, PeerId, Swarm,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::room_code::RoomId;
use super::transport::Transport;
use crate::config::NetworkConfig;

/// Protocol version announced through identify
const PROTOCOL_VERSION: &str = "/syncwatch/1.0.0";

/// Network-related errors
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Failed to create transport: {0}")]
    Transport(String),

    #[error("Invalid address {0}")]
    InvalidAddress(String),

    #[error("Not in a room")]
    NotInRoom,

    #[error("Already in a room")]
    AlreadyInRoom,

    #[error("libp2p error: {0}")]
    Libp2p(String),

    #[error("Network task closed")]
    Closed,
}

#[derive(NetworkBehaviour)]
pub struct SyncwatchBehaviour {
    /// Keep-alive
    ping: ping::Behaviour,
    identify: identify::Behaviour,
    /// Room messages
    gossipsub: gossipsub::Behaviour,
    /// Local network discovery, off when disabled in config
    mdns: Toggle<mdns::tokio::Behaviour>,
}

/// Events emitted by the network manager
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkEvent {
    /// Network is ready (listening)
    Ready { peer_id: String },
    /// Dialable addresses of this node, sent once a room is open and whenever they change
    ListeningAddresses { addresses: Vec<String> },
    /// A peer joined our room topic
    PeerConnected { peer_id: String },
    /// A peer left our room topic or its last connection closed
    PeerDisconnected { peer_id: String },
    /// Raw room message
    Data { from: String, data: Vec<u8> },
    Error(String),
}

/// Commands sent to the network manager
#[derive(Debug)]
pub enum NetworkCommand {
    OpenRoom { room_id: RoomId },
    Dial { addresses: Vec<String> },
    Send { data: Vec<u8> },
    Shutdown,
}

/// Handle to communicate with the running network
#[derive(Clone)]
pub struct NetworkHandle {
    command_tx: mpsc::UnboundedSender<NetworkCommand>,
    local_peer_id: String,
}

impl NetworkHandle {
    fn command(&self, command: NetworkCommand) -> Result<(), NetworkError> {
        self.command_tx
            .send(command)
            .map_err(|_| NetworkError::Closed)
    }
}

impl Transport for NetworkHandle {
    fn local_peer_id(&self) -> &str {
        &self.local_peer_id
    }

    fn open_room(&self, room_id: &RoomId) -> Result<(), NetworkError> {
        self.command(NetworkCommand::OpenRoom {
            room_id: room_id.clone(),
        })
    }

    fn dial(&self, addresses: &[String]) -> Result<(), NetworkError> {
        self.command(NetworkCommand::Dial {
            addresses: addresses.to_vec(),
        })
    }

    fn send(&self, data: Vec<u8>) -> Result<(), NetworkError> {
        self.command(NetworkCommand::Send { data })
    }

    fn shutdown(&self) {
        let _ = self.command_tx.send(NetworkCommand::Shutdown);
    }
}

/// Gossipsub topic of a room
pub fn room_topic(room_id: &RoomId) -> gossipsub::IdentTopic {
    gossipsub::IdentTopic::new(format!("syncwatch-room-{}", room_id))
}

/// Listen address with our peer id appended, unless already there
fn dialable(address: &Multiaddr, local_peer_id: &PeerId) -> String {
    let addr = address.to_string();
    let peer = local_peer_id.to_string();
    if addr.ends_with(&peer) {
        addr
    } else {
        format!("{}/p2p/{}", addr, peer)
    }
}

/// Manages P2P networking - runs in a background task
pub struct NetworkManager {
    local_peer_id: PeerId,
    keypair: identity::Keypair,
    config: NetworkConfig,
    room_topic: Option<gossipsub::IdentTopic>,
    /// Peers subscribed to our room topic
    room_peers: HashSet<PeerId>,
    listening_addresses: Vec<String>,
}

impl NetworkManager {
    pub fn with_config(config: NetworkConfig) -> Self {
        let keypair = identity::Keypair::generate_ed25519();
        let local_peer_id = PeerId::from(keypair.public());

        info!("Local peer ID: {}", local_peer_id);

        Self {
            local_peer_id,
            keypair,
            config,
            room_topic: None,
            room_peers: HashSet::new(),
            listening_addresses: Vec::new(),
        }
    }

    pub fn local_peer_id(&self) -> &PeerId {
        &self.local_peer_id
    }

    /// Start the network and return a handle for communication
    pub fn start(self) -> (NetworkHandle, mpsc::UnboundedReceiver<NetworkEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let handle = NetworkHandle {
            command_tx,
            local_peer_id: self.local_peer_id.to_string(),
        };

        tokio::spawn(async move {
            let error_tx = event_tx.clone();
            if let Err(e) = self.run(event_tx, command_rx).await {
                warn!("Network task error: {}", e);
                let _ = error_tx.send(NetworkEvent::Error(e.to_string()));
            }
        });

        (handle, event_rx)
    }

    /// Transport chain: TCP (noise + yamux) -> QUIC -> DNS
    fn create_swarm(&self) -> Result<Swarm<SyncwatchBehaviour>, NetworkError> {
        let enable_mdns = self.config.enable_mdns;

        let swarm = libp2p::SwarmBuilder::with_existing_identity(self.keypair.clone())
            .with_tokio()
            .with_tcp(
                tcp::Config::default().nodelay(true),
                noise::Config::new,
                yamux::Config::default,
            )
            .map_err(|e| NetworkError::Transport(e.to_string()))?
            .with_quic()
            .with_dns()
            .map_err(|e| NetworkError::Transport(e.to_string()))?
            .with_behaviour(|keypair| {
                let ping = ping::Behaviour::new(
                    ping::Config::new()
                        .with_interval(Duration::from_secs(15))
                        .with_timeout(Duration::from_secs(20)),
                );

                let mdns = if enable_mdns {
                    Some(
                        mdns::tokio::Behaviour::new(
                            mdns::Config::default(),
                            keypair.public().to_peer_id(),
                        )
                        .map_err(|e| e.to_string())?,
                    )
                } else {
                    None
                };

                // Rooms are a handful of peers.
                // Must satisfy: mesh_outbound_min <= mesh_n_low <= mesh_n <= mesh_n_high
                let gossipsub_config = gossipsub::ConfigBuilder::default()
                    .heartbeat_interval(Duration::from_secs(1))
                    .validation_mode(gossipsub::ValidationMode::Strict)
                    .mesh_outbound_min(0)
                    .mesh_n_low(1)
                    .mesh_n(3)
                    .mesh_n_high(6)
                    .gossip_lazy(3)
                    .build()
                    .map_err(|e| e.to_string())?;

                let gossipsub = gossipsub::Behaviour::new(
                    gossipsub::MessageAuthenticity::Signed(keypair.clone()),
                    gossipsub_config,
                )
                .map_err(|e| e.to_string())?;

                let identify = identify::Behaviour::new(identify::Config::new(
                    PROTOCOL_VERSION.into(),
                    keypair.public(),
                ));

                Ok(SyncwatchBehaviour {
                    ping,
                    identify,
                    gossipsub,
                    mdns: Toggle::from(mdns),
                })
            })
            .map_err(|e| NetworkError::Transport(e.to_string()))?
            .with_swarm_config(|c| c.with_idle_connection_timeout(Duration::from_secs(300)))
            .build();

        Ok(swarm)
    }

    async fn run(
        mut self,
        event_tx: mpsc::UnboundedSender<NetworkEvent>,
        mut command_rx: mpsc::UnboundedReceiver<NetworkCommand>,
    ) -> Result<(), NetworkError> {
        let mut swarm = self.create_swarm()?;

        for addr in &self.config.listen_addresses {
            match addr.parse::<Multiaddr>() {
                Ok(multiaddr) => match swarm.listen_on(multiaddr) {
                    Ok(id) => info!("Listener {:?} started on {}", id, addr),
                    Err(e) => warn!("Failed to listen on {}: {:?}", addr, e),
                },
                Err(e) => warn!("Invalid listen address {}: {}", addr, e),
            }
        }

        let _ = event_tx.send(NetworkEvent::Ready {
            peer_id: self.local_peer_id.to_string(),
        });

        loop {
            tokio::select! {
                event = swarm.select_next_some() => {
                    self.handle_swarm_event(&mut swarm, event, &event_tx);
                }
                cmd = command_rx.recv() => {
                    let Some(cmd) = cmd else {
                        info!("Network handle dropped, shutting down");
                        break;
                    };
                    match cmd {
                        NetworkCommand::OpenRoom { room_id } => {
                            match self.open_room(&mut swarm, &room_id) {
                                Ok(()) => self.announce_addresses(&event_tx),
                                Err(e) => {
                                    let _ = event_tx.send(NetworkEvent::Error(e.to_string()));
                                }
                            }
                        }
                        NetworkCommand::Dial { addresses } => {
                            self.dial(&mut swarm, &addresses);
                        }
                        NetworkCommand::Send { data } => {
                            if let Err(e) = self.publish(&mut swarm, data) {
                                debug!("Publish error (may be no peers yet): {}", e);
                            }
                        }
                        NetworkCommand::Shutdown => {
                            info!("Network shutting down");
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn handle_swarm_event(
        &mut self,
        swarm: &mut Swarm<SyncwatchBehaviour>,
        event: SwarmEvent<SyncwatchBehaviourEvent>,
        event_tx: &mpsc::UnboundedSender<NetworkEvent>,
    ) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                let full_addr = dialable(&address, &self.local_peer_id);
                info!("Listening on {}", full_addr);
                self.listening_addresses.push(full_addr);
                self.announce_addresses(event_tx);
            }

            SwarmEvent::ExpiredListenAddr { address, .. } => {
                let full_addr = dialable(&address, &self.local_peer_id);
                self.listening_addresses.retain(|a| a != &full_addr);
                self.announce_addresses(event_tx);
            }

            SwarmEvent::Behaviour(SyncwatchBehaviourEvent::Mdns(mdns::Event::Discovered(peers))) => {
                for (peer_id, addr) in peers {
                    if peer_id != self.local_peer_id {
                        debug!("mDNS discovered peer: {} at {}", peer_id, addr);
                        if let Err(e) = swarm.dial(addr) {
                            debug!("Failed to dial discovered peer {}: {}", peer_id, e);
                        }
                    }
                }
            }

            SwarmEvent::Behaviour(SyncwatchBehaviourEvent::Mdns(mdns::Event::Expired(peers))) => {
                for (peer_id, _) in peers {
                    debug!("mDNS peer expired: {}", peer_id);
                }
            }

            SwarmEvent::Behaviour(SyncwatchBehaviourEvent::Gossipsub(
                gossipsub::Event::Message {
                    propagation_source,
                    message,
                    ..
                },
            )) => {
                let from = message.source.unwrap_or(propagation_source);
                debug!("Received {} bytes from {}", message.data.len(), from);
                let _ = event_tx.send(NetworkEvent::Data {
                    from: from.to_string(),
                    data: message.data,
                });
            }

            SwarmEvent::Behaviour(SyncwatchBehaviourEvent::Gossipsub(
                gossipsub::Event::Subscribed { peer_id, topic },
            )) => {
                if self.is_room_topic(&topic) && self.room_peers.insert(peer_id) {
                    info!("Peer {} joined the room", peer_id);
                    let _ = event_tx.send(NetworkEvent::PeerConnected {
                        peer_id: peer_id.to_string(),
                    });
                }
            }

            SwarmEvent::Behaviour(SyncwatchBehaviourEvent::Gossipsub(
                gossipsub::Event::Unsubscribed { peer_id, topic },
            )) => {
                if self.is_room_topic(&topic) {
                    self.peer_left(peer_id, event_tx);
                }
            }

            SwarmEvent::Behaviour(SyncwatchBehaviourEvent::Identify(identify::Event::Received {
                peer_id,
                info,
                ..
            })) => {
                debug!("Identified peer {} running {}", peer_id, info.protocol_version);
            }

            SwarmEvent::ConnectionEstablished {
                peer_id, endpoint, ..
            } => {
                info!("Connection established with {} via {:?}", peer_id, endpoint);
                swarm.behaviour_mut().gossipsub.add_explicit_peer(&peer_id);
            }

            SwarmEvent::ConnectionClosed {
                peer_id,
                num_established,
                ..
            } => {
                debug!("Connection closed with {}", peer_id);
                if num_established == 0 {
                    swarm.behaviour_mut().gossipsub.remove_explicit_peer(&peer_id);
                    self.peer_left(peer_id, event_tx);
                }
            }

            SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => match peer_id {
                Some(peer) => warn!("Failed to connect to {}: {}", peer, error),
                None => warn!("Outgoing connection error: {}", error),
            },

            SwarmEvent::ListenerError { listener_id, error } => {
                warn!("Listener {:?} error: {}", listener_id, error);
            }

            _ => {}
        }
    }

    fn is_room_topic(&self, topic: &gossipsub::TopicHash) -> bool {
        self.room_topic
            .as_ref()
            .is_some_and(|ours| &ours.hash() == topic)
    }

    fn peer_left(&mut self, peer_id: PeerId, event_tx: &mpsc::UnboundedSender<NetworkEvent>) {
        if self.room_peers.remove(&peer_id) {
            info!("Peer {} left the room", peer_id);
            let _ = event_tx.send(NetworkEvent::PeerDisconnected {
                peer_id: peer_id.to_string(),
            });
        }
    }

    /// Addresses are only worth publishing once we are in a room
    fn announce_addresses(&self, event_tx: &mpsc::UnboundedSender<NetworkEvent>) {
        if self.room_topic.is_some() && !self.listening_addresses.is_empty() {
            let _ = event_tx.send(NetworkEvent::ListeningAddresses {
                addresses: self.listening_addresses.clone(),
            });
        }
    }

    fn open_room(
        &mut self,
        swarm: &mut Swarm<SyncwatchBehaviour>,
        room_id: &RoomId,
    ) -> Result<(), NetworkError> {
        if self.room_topic.is_some() {
            return Err(NetworkError::AlreadyInRoom);
        }

        let topic = room_topic(room_id);
        swarm
            .behaviour_mut()
            .gossipsub
            .subscribe(&topic)
            .map_err(|e| NetworkError::Libp2p(e.to_string()))?;

        info!("Subscribed to room: {}", room_id);
        self.room_topic = Some(topic);
        self.room_peers.clear();
        Ok(())
    }

    fn dial(&self, swarm: &mut Swarm<SyncwatchBehaviour>, addresses: &[String]) {
        for addr in addresses {
            match addr.parse::<Multiaddr>() {
                Ok(multiaddr) => {
                    info!("Dialing peer at {}", multiaddr);
                    if let Err(e) = swarm.dial(multiaddr) {
                        debug!("Failed to dial {}: {}", addr, e);
                    }
                }
                Err(_) => warn!("{}", NetworkError::InvalidAddress(addr.clone())),
            }
        }
    }

    fn publish(
        &self,
        swarm: &mut Swarm<SyncwatchBehaviour>,
        data: Vec<u8>,
    ) -> Result<(), NetworkError> {
        let topic = self.room_topic.as_ref().ok_or(NetworkError::NotInRoom)?;
        swarm
            .behaviour_mut()
            .gossipsub
            .publish(topic.clone(), data)
            .map_err(|e| NetworkError::Libp2p(e.to_string()))?;
        Ok(())
    }
}
