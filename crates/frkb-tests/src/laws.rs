//! Round-trip laws over the hash contract and the diff protocol.
