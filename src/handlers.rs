use crate::http::{Request, Response, Status};
use crate::mailbox::OwnerHint;
use crate::messages::{Outbound, RingMessage};
use crate::{pseudo_hash, NodeInfo, NodeState};
use std::net::SocketAddr;
use tracing::{debug, info};

/// Outcome of routing one HTTP request.
#[derive(Debug, PartialEq, Eq)]
pub struct Routed {
    pub response: Response,
    // lookup to send to the successor when the request was deferred
    pub lookup: Option<Outbound>,
}

impl From<Response> for Routed {
    fn from(response: Response) -> Self {
        Self {
            response,
            lookup: None,
        }
    }
}

fn location(node: &NodeInfo, uri: &str) -> String {
    format!("http://{}{}", node.addr, uri)
}

/// Routes a request: serve it here, redirect to the successor, redirect to
/// the owner from the last ring reply, or defer with a 503 while a lookup goes
/// out to the successor. The order of these checks matters.
pub fn handle_request(s: &mut NodeState, request: &Request<'_>) -> Routed {
    let hash = pseudo_hash(request.uri.as_bytes());
    debug!(
        "Handling {} {} ({} byte payload), hash {:#06x}",
        request.method,
        request.uri,
        request.payload.len(),
        hash
    );

    if s.ring.owns(hash) {
        debug!("Responsible for hash {:#06x}", hash);
        return serve_locally(s, request).into();
    }

    if s.ring.successor_owns(hash) {
        debug!(
            "Successor {} is responsible for hash {:#06x}, redirecting",
            s.ring.successor, hash
        );
        return Response::see_other(location(&s.ring.successor, request.uri)).into();
    }

    if let Some(hint) = s.mailbox.take() {
        debug!(
            "Redirecting hash {:#06x} to {} from the last ring reply",
            hash, hint.owner
        );
        return Response::see_other(location(&hint.owner, request.uri)).into();
    }

    debug!(
        "Owner of hash {:#06x} unknown, asking successor {}",
        hash, s.ring.successor
    );
    Routed {
        response: Response::service_unavailable(),
        lookup: Some(Outbound {
            to: s.ring.successor.addr,
            message: RingMessage::Lookup {
                hash,
                origin: s.ring.me,
            },
        }),
    }
}

fn serve_locally(s: &mut NodeState, request: &Request<'_>) -> Response {
    let key = request.uri;
    match request.method {
        "GET" => match s.store.get(&key.to_string()) {
            Some(value) => Response::ok(value.clone()),
            None => Response::new(Status::NotFound),
        },
        "PUT" => {
            let replaced = s.store.put(key.to_string(), request.payload.to_vec());
            debug!("PUT {} completed, replaced: {}", key, replaced);
            if replaced {
                Response::new(Status::NoContent)
            } else {
                Response::new(Status::Created)
            }
        }
        "DELETE" => {
            if s.store.delete(&key.to_string()) {
                Response::new(Status::NoContent)
            } else {
                Response::new(Status::NotFound)
            }
        }
        _ => Response::new(Status::NotImplemented),
    }
}

/// Reacts to a ring message. Returns the message to send in response, if any.
pub fn handle_ring_message(
    s: &mut NodeState,
    msg: RingMessage,
    from: SocketAddr,
) -> Option<Outbound> {
    debug!("Got {} from {}", msg, from);
    match msg {
        RingMessage::Lookup { hash, origin } => Some(handle_lookup(s, hash, origin, msg)),
        RingMessage::Reply {
            predecessor_id,
            owner,
        } => {
            info!("Ring reply from {}: owner {}", from, owner);
            s.mailbox.store(OwnerHint {
                owner,
                predecessor_id,
            });
            None
        }
    }
}

fn handle_lookup(s: &NodeState, hash: u16, origin: NodeInfo, msg: RingMessage) -> Outbound {
    let ring = &s.ring;

    let reply = if ring.successor_owns(hash) {
        debug!("Successor {} is responsible for {:#06x}", ring.successor, hash);
        Some(RingMessage::Reply {
            predecessor_id: ring.me.id,
            owner: ring.successor,
        })
    } else if ring.owns(hash) {
        debug!("Responsible for {:#06x}", hash);
        Some(RingMessage::Reply {
            predecessor_id: ring.pred_id,
            owner: ring.me,
        })
    } else {
        None
    };

    match reply {
        Some(message) => Outbound {
            to: origin.addr,
            message,
        },
        None => {
            debug!(
                "Relaying lookup for {:#06x} to successor {}",
                hash, ring.successor
            );
            Outbound {
                to: ring.successor.addr,
                message: msg,
            }
        }
    }
}
