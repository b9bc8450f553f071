use crate::{Packet, PacketId};
use std::collections::{HashMap, VecDeque};

/// Unacknowledged packets, keyed by packet identifier and kept in the order
/// they were first inserted.
#[derive(Clone, Debug, Default)]
pub struct RetransmissionLedger {
	packets: HashMap<PacketId, Packet>,
	order: VecDeque<PacketId>,
}

impl RetransmissionLedger {
	pub fn new() -> Self {
		Self::default()
	}

	/// Records `packet` under `id`.
	///
	/// Replacing an existing entry keeps its original position, so a PubRel
	/// stored in place of a Publish is replayed where the Publish was.
	pub fn insert(&mut self, id: PacketId, packet: Packet) -> Option<Packet> {
		let previous = self.packets.insert(id, packet);
		if previous.is_none() {
			self.order.push_back(id);
		}
		previous
	}

	#[inline]
	pub fn get(&self, id: PacketId) -> Option<&Packet> {
		self.packets.get(&id)
	}

	#[inline]
	pub fn contains(&self, id: PacketId) -> bool {
		self.packets.contains_key(&id)
	}

	pub fn remove(&mut self, id: PacketId) -> Option<Packet> {
		let packet = self.packets.remove(&id)?;
		self.order.retain(|pending| *pending != id);
		Some(packet)
	}

	/// Returns clones of every pending packet in insertion order, ready to be
	/// resent. Publish packets are marked as duplicates.
	pub fn replay(&self) -> Vec<Packet> {
		self.pending()
			.map(|(_, packet)| {
				let mut packet = packet.clone();
				if let Packet::Publish(publish) = &mut packet {
					publish.set_duplicate(true);
				}
				packet
			})
			.collect()
	}

	/// Iterates over pending packets in insertion order.
	pub fn pending(&self) -> impl Iterator<Item = (PacketId, &Packet)> {
		self.order
			.iter()
			.filter_map(|id| self.packets.get(id).map(|packet| (*id, packet)))
	}

	#[inline]
	pub fn len(&self) -> usize {
		self.packets.len()
	}

	#[inline]
	pub fn is_empty(&self) -> bool {
		self.packets.is_empty()
	}

	pub fn clear(&mut self) {
		self.packets.clear();
		self.order.clear();
	}
}

/// Hands out packet identifiers that are not in use by a ledger.
#[derive(Clone, Copy, Debug)]
pub struct PacketIdAllocator {
	next: PacketId,
}

impl Default for PacketIdAllocator {
	fn default() -> Self {
		Self {
			next: PacketId::MIN,
		}
	}
}

impl PacketIdAllocator {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the next identifier not pending in `ledger`, wrapping from
	/// 65535 back to 1. Returns `None` when every identifier is in flight.
	pub fn next(&mut self, ledger: &RetransmissionLedger) -> Option<PacketId> {
		for _ in 0..u16::MAX {
			let id = self.next;
			self.next = id.checked_add(1).unwrap_or(PacketId::MIN);
			if !ledger.contains(id) {
				return Some(id);
			}
		}

		None
	}
}

#[cfg(test)]
mod tests {
	use super::{PacketIdAllocator, RetransmissionLedger};
	use crate::{
		packets::{PubRel, Publish},
		Packet, PacketId, TopicBuf,
	};
	use bytes::Bytes;

	fn id(value: u16) -> PacketId {
		PacketId::new(value).unwrap()
	}

	fn publish(value: u16) -> Packet {
		Publish::AtLeastOnce {
			id: id(value),
			retain: false,
			duplicate: false,
			topic: TopicBuf::new("a").unwrap(),
			payload: Bytes::new(),
		}
		.into()
	}

	#[test]
	fn replays_in_insertion_order() {
		let mut ledger = RetransmissionLedger::new();
		ledger.insert(id(3), publish(3));
		ledger.insert(id(1), publish(1));
		ledger.insert(id(2), publish(2));
		ledger.remove(id(1));

		// Replacing an entry keeps its place.
		ledger.insert(id(3), PubRel { id: id(3) }.into());

		let replayed = ledger.replay();
		assert_eq!(replayed.len(), 2);
		assert_eq!(replayed[0], Packet::from(PubRel { id: id(3) }));
		match &replayed[1] {
			Packet::Publish(publish) => {
				assert!(publish.duplicate());
				assert_eq!(publish.id(), Some(id(2)));
			}
			packet => panic!("unexpected {packet:?}"),
		}

		// The stored packets are unchanged.
		match ledger.get(id(2)) {
			Some(Packet::Publish(publish)) => assert!(!publish.duplicate()),
			packet => panic!("unexpected {packet:?}"),
		}
	}

	#[test]
	fn allocates_unused_ids() {
		let mut ledger = RetransmissionLedger::new();
		let mut allocator = PacketIdAllocator::new();

		assert_eq!(allocator.next(&ledger), Some(id(1)));
		ledger.insert(id(2), publish(2));
		assert_eq!(allocator.next(&ledger), Some(id(3)));
	}

	#[test]
	fn wraps_and_exhausts_ids() {
		let mut ledger = RetransmissionLedger::new();
		let mut allocator = PacketIdAllocator::new();

		for value in 1..=u16::MAX {
			let allocated = allocator.next(&ledger).unwrap();
			assert_eq!(allocated, id(value));
			ledger.insert(allocated, Packet::PingReq);
		}

		assert_eq!(allocator.next(&ledger), None);

		ledger.remove(id(40_000));
		assert_eq!(allocator.next(&ledger), Some(id(40_000)));
	}
}
