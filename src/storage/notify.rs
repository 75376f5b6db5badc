//! Callback-based strategy over a distributed storage client.
//!
//! Requests are addressed by the owner's public-key identity and mutations are
//! signed with the owner's Ed25519 key. The client answers through a callback,
//! which resolves the [`Completion`] handed back to the caller.

use crate::crypto::ed25519::{OwnerIdentity, ED25519_PUBLIC_KEY_SIZE};

use super::{Completion, Storage, StorageError};

/// Callback invoked exactly once with the outcome of a request.
pub type ResponseFn<T> = Box<dyn FnOnce(Result<T, StorageError>) + Send + 'static>;

/// Proof that the owner issued a mutation.
#[derive(Debug, Clone)]
pub struct Authorization {
    pub public_key: [u8; ED25519_PUBLIC_KEY_SIZE],
    pub signature: Vec<u8>,
}

/// Payload signed for deletes, so a put signature can't be replayed as one.
pub const DELETE_PAYLOAD: &[u8] = b"delete";

/// A distributed store that answers asynchronously.
///
/// Implementations may run `respond` on any thread, including the caller's.
pub trait DistributedClient: Send + Sync {
    fn put(
        &self,
        owner: &str,
        name: &str,
        bytes: Vec<u8>,
        authorization: Authorization,
        respond: ResponseFn<()>,
    );

    fn get(&self, owner: &str, name: &str, respond: ResponseFn<Vec<u8>>);

    fn delete(&self, owner: &str, name: &str, authorization: Authorization, respond: ResponseFn<()>);
}

/// [`Storage`] that submits to a [`DistributedClient`] and returns pending
/// completions.
pub struct NotifyingStorage<C> {
    client: C,
    identity: OwnerIdentity,
    owner: String,
}

impl<C: DistributedClient> NotifyingStorage<C> {
    pub fn new(client: C, identity: OwnerIdentity) -> Self {
        let owner = identity.owner_name();
        Self {
            client,
            identity,
            owner,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    fn authorize(&self, name: &str, payload: &[u8]) -> Authorization {
        Authorization {
            public_key: self.identity.public_key(),
            signature: self.identity.sign(name, payload),
        }
    }
}

fn responder<T: Send + 'static>() -> (ResponseFn<T>, Completion<T>) {
    let (tx, completion) = Completion::channel();
    let respond: ResponseFn<T> = Box::new(move |result| {
        // Receiver gone means the caller didn't wait; nothing to deliver to.
        let _ = tx.send(result);
    });
    (respond, completion)
}

impl<C: DistributedClient> Storage for NotifyingStorage<C> {
    fn put(&self, name: &str, bytes: Vec<u8>) -> Completion<()> {
        let authorization = self.authorize(name, &bytes);
        let (respond, completion) = responder();
        log::debug!("Submitting put of {} ({} bytes) for {}", name, bytes.len(), self.owner);
        self.client.put(&self.owner, name, bytes, authorization, respond);
        completion
    }

    fn get(&self, name: &str) -> Completion<Vec<u8>> {
        let (respond, completion) = responder();
        self.client.get(&self.owner, name, respond);
        completion
    }

    fn delete(&self, name: &str) -> Completion<()> {
        let authorization = self.authorize(name, DELETE_PAYLOAD);
        let (respond, completion) = responder();
        log::debug!("Submitting delete of {} for {}", name, self.owner);
        self.client.delete(&self.owner, name, authorization, respond);
        completion
    }
}
