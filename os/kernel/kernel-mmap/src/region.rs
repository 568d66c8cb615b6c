//! # Region Registry
//!
//! Every process owns one [`RegionRegistry`] describing the part of its
//! address space between the end of the program image and the high-water mark.
//! Each [`Region`] is either *live* (backing a mapping) or *free* (a hole left
//! behind by `munmap`, available for reuse).
//!
//! ```text
//!  image end                                               high-water mark
//!      ├── live ──┬──── free ────┬── live ──┬── live ──┬─────┤
//!      │ 0x3000   │ 0x4000       │ 0x6000   │ 0x7000   │     │ 0x8000
//! ```
//!
//! Region records live in a slot arena and are addressed through
//! generation-checked [`RegionId`] handles. A separate index vector keeps the
//! handles sorted by base address, so splitting and merging are plain vector
//! insertions and removals.
//!
//! ## Invariants
//!
//! After every public mutation returns:
//! - regions are sorted strictly ascending by base address and do not overlap;
//! - every reserved length is a non-zero page multiple covering the requested length;
//! - no two neighbouring regions are both free.

use crate::error::RegistryError;
use crate::file::Fd;
use alloc::vec::Vec;
use kernel_info::memory::{PAGE_SIZE, USER_MMAP_CEILING};
use kernel_memory_addresses::{VirtualAddress, is_page_aligned, round_up_to_page};
use log::{debug, trace};

/// What backs the pages of a region.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegionKind {
    /// Zero-filled on first touch.
    Anonymous,
    /// Hydrated from the region's file on first touch.
    FileBacked,
}

/// Access granted to the user for the pages of a region.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Protection {
    ReadOnly,
    Writable,
}

impl Protection {
    #[inline]
    #[must_use]
    pub const fn is_writable(self) -> bool {
        matches!(self, Self::Writable)
    }
}

/// Handle to a region record.
///
/// Handles are invalidated when their region is merged into a neighbour;
/// the generation check turns a stale handle into an error instead of a
/// reference to an unrelated region.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct RegionId {
    index: u32,
    generation: u32,
}

/// A contiguous, page-aligned span of a process's address space.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Region {
    base: VirtualAddress,
    requested_len: u64,
    reserved_len: u64,
    free: bool,
    kind: RegionKind,
    protection: Protection,
    file_offset: u64,
    fd: Option<Fd>,
}

impl Region {
    const fn live(base: VirtualAddress, requested_len: u64, reserved_len: u64) -> Self {
        Self {
            base,
            requested_len,
            reserved_len,
            free: false,
            kind: RegionKind::Anonymous,
            protection: Protection::ReadOnly,
            file_offset: 0,
            fd: None,
        }
    }

    const fn hole(base: VirtualAddress, reserved_len: u64) -> Self {
        let mut region = Self::live(base, 0, reserved_len);
        region.free = true;
        region
    }

    #[inline]
    #[must_use]
    pub const fn base(&self) -> VirtualAddress {
        self.base
    }

    /// One past the last reserved byte.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> VirtualAddress {
        VirtualAddress::new(self.base.as_u64() + self.reserved_len)
    }

    /// Length passed to `mmap`; zero for free regions.
    #[inline]
    #[must_use]
    pub const fn requested_len(&self) -> u64 {
        self.requested_len
    }

    #[inline]
    #[must_use]
    pub const fn reserved_len(&self) -> u64 {
        self.reserved_len
    }

    #[inline]
    #[must_use]
    pub const fn is_free(&self) -> bool {
        self.free
    }

    #[inline]
    #[must_use]
    pub const fn kind(&self) -> RegionKind {
        self.kind
    }

    #[inline]
    #[must_use]
    pub const fn protection(&self) -> Protection {
        self.protection
    }

    #[inline]
    #[must_use]
    pub const fn file_offset(&self) -> u64 {
        self.file_offset
    }

    /// The region's own duplicated descriptor, for file-backed regions.
    #[inline]
    #[must_use]
    pub const fn fd(&self) -> Option<Fd> {
        self.fd
    }

    /// Whether `addr` falls inside the reserved span.
    #[inline]
    #[must_use]
    pub const fn covers(&self, addr: VirtualAddress) -> bool {
        let addr = addr.as_u64();
        addr >= self.base.as_u64() && addr - self.base.as_u64() < self.reserved_len
    }

    /// Record how a freshly acquired region is backed.
    pub(crate) const fn stamp(
        &mut self,
        kind: RegionKind,
        protection: Protection,
        file_offset: u64,
        fd: Option<Fd>,
    ) {
        self.kind = kind;
        self.protection = protection;
        self.file_offset = file_offset;
        self.fd = fd;
    }

    const fn mark_free(&mut self) {
        *self = Self::hole(self.base, self.reserved_len);
    }
}

/// Clamp `hint` into the span of `region` such that `length` bytes fit.
///
/// - hint at or below the region start: the region start;
/// - hint past the last address that still leaves room: that address;
/// - otherwise the hint itself.
///
/// `length` must not exceed the region's reserved length.
#[must_use]
pub const fn find_best_fit_address(
    region: &Region,
    hint: VirtualAddress,
    length: u64,
) -> VirtualAddress {
    let lower = region.base.as_u64();
    let last = lower + region.reserved_len - length;
    let hint = hint.as_u64();

    if hint <= lower {
        VirtualAddress::new(lower)
    } else if hint > last {
        VirtualAddress::new(last)
    } else {
        VirtualAddress::new(hint)
    }
}

struct Slot {
    generation: u32,
    region: Option<Region>,
}

/// Detail of a broken registry invariant, reported by
/// [`RegionRegistry::check_invariants`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum InvariantViolation {
    #[error("region at {0} is not page aligned or has an invalid length")]
    Misshapen(VirtualAddress),
    #[error("region at {0} reserves less than it was asked for")]
    Undersized(VirtualAddress),
    #[error("regions at {0} and {1} are out of order or overlap")]
    Overlap(VirtualAddress, VirtualAddress),
    #[error("neighbouring regions at {0} and {1} are both free")]
    AdjacentFree(VirtualAddress, VirtualAddress),
    #[error("order index refers to an empty slot")]
    DanglingIndex,
}

/// The ordered set of regions of one process.
pub struct RegionRegistry {
    slots: Vec<Slot>,
    vacant: Vec<u32>,
    /// Handles sorted by base address.
    order: Vec<RegionId>,
    ceiling: VirtualAddress,
}

impl Default for RegionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RegionRegistry {
    /// An empty registry bounded by [`USER_MMAP_CEILING`].
    #[must_use]
    pub const fn new() -> Self {
        Self::with_ceiling(VirtualAddress::new(USER_MMAP_CEILING))
    }

    /// An empty registry whose regions may not reach past `ceiling`.
    #[must_use]
    pub const fn with_ceiling(ceiling: VirtualAddress) -> Self {
        Self {
            slots: Vec::new(),
            vacant: Vec::new(),
            order: Vec::new(),
            ceiling,
        }
    }

    /// Number of regions, live and free.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    #[must_use]
    pub fn region(&self, id: RegionId) -> Option<&Region> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.region.as_ref()
    }

    pub(crate) fn region_mut(&mut self, id: RegionId) -> Option<&mut Region> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.region.as_mut()
    }

    /// All regions in ascending address order.
    pub fn iter(&self) -> impl Iterator<Item = (RegionId, &Region)> + '_ {
        self.order
            .iter()
            .filter_map(|&id| self.region(id).map(|region| (id, region)))
    }

    /// Live regions in ascending address order.
    pub fn live(&self) -> impl Iterator<Item = (RegionId, &Region)> + '_ {
        self.iter().filter(|(_, region)| !region.is_free())
    }

    /// The live region created by `mmap(…, length, …)` that returned `addr`.
    ///
    /// Only an exact `(base, requested length)` match counts.
    #[must_use]
    pub fn find_region(&self, addr: VirtualAddress, length: u64) -> Option<RegionId> {
        self.live()
            .find(|(_, region)| region.base == addr && region.requested_len == length)
            .map(|(id, _)| id)
    }

    /// The live region whose reserved span contains `addr`.
    #[must_use]
    pub fn find_containing(&self, addr: VirtualAddress) -> Option<RegionId> {
        self.live()
            .find(|(_, region)| region.covers(addr))
            .map(|(id, _)| id)
    }

    /// Whether any live region contains `addr`.
    #[must_use]
    pub fn contains(&self, addr: VirtualAddress) -> bool {
        self.find_containing(addr).is_some()
    }

    /// Reserve `length` bytes as a live region, preferably close to `hint`.
    ///
    /// Free regions are tried first, in address order; the first one whose
    /// best-fit address equals the hint (or any one, when no hint is given)
    /// wins outright. Otherwise the scan stops as soon as the distance to the
    /// hint starts growing again. Without a suitable hole the region is
    /// appended at `high_water`, which then grows by the page-rounded length.
    ///
    /// # Errors
    /// - [`RegistryError::EmptyRange`] for a zero length.
    /// - [`RegistryError::OutOfAddressSpace`] if the region would cross the ceiling.
    /// - [`RegistryError::OutOfMemory`] if metadata storage cannot grow. The
    ///   registry is left untouched in that case.
    pub fn acquire_region(
        &mut self,
        hint: VirtualAddress,
        length: u64,
        high_water: &mut VirtualAddress,
    ) -> Result<RegionId, RegistryError> {
        if length == 0 {
            return Err(RegistryError::EmptyRange);
        }
        let rounded = round_up_to_page(length).ok_or(RegistryError::OutOfAddressSpace { length })?;
        let hint = hint.align_down();

        let mut best: Option<(usize, VirtualAddress, u64)> = None;
        for (position, &id) in self.order.iter().enumerate() {
            let Some(region) = self.region(id) else {
                continue;
            };
            if !region.free || region.reserved_len < rounded {
                continue;
            }

            let addr = find_best_fit_address(region, hint, rounded);
            let distance = addr.abs_diff(hint);
            if hint.is_null() || distance == 0 {
                best = Some((position, addr, distance));
                break;
            }
            match best {
                Some((_, _, best_distance)) if distance > best_distance => break,
                Some((_, _, best_distance)) if distance == best_distance => {}
                _ => best = Some((position, addr, distance)),
            }
        }

        let id = match best {
            Some((position, addr, _)) => self.carve(position, addr, length, rounded)?,
            None => self.append(high_water, length, rounded)?,
        };
        debug_assert_eq!(self.check_invariants(), Ok(()));
        Ok(id)
    }

    /// Mark a live region free and merge it with free neighbours.
    ///
    /// The caller tears down the region's pages and descriptor first. `id` is
    /// stale afterwards if the region got merged into its predecessor.
    ///
    /// # Errors
    /// [`RegistryError::StaleHandle`] or [`RegistryError::AlreadyFree`].
    pub fn release_region(&mut self, id: RegionId) -> Result<(), RegistryError> {
        let region = self
            .region_mut(id)
            .ok_or(RegistryError::StaleHandle(id))?;
        if region.free {
            return Err(RegistryError::AlreadyFree(id));
        }

        debug!(
            "releasing region {}..{} ({:#x} bytes)",
            region.base,
            region.end(),
            region.reserved_len
        );
        region.mark_free();
        self.coalesce();
        debug_assert_eq!(self.check_invariants(), Ok(()));
        Ok(())
    }

    /// Merge every run of neighbouring free regions into its first region.
    ///
    /// After a merge the comparison restarts at the surviving region, so runs
    /// of any length collapse in a single pass.
    pub fn coalesce(&mut self) {
        let mut position = 0;
        while position + 1 < self.order.len() {
            let (left, right) = (self.order[position], self.order[position + 1]);
            let mergeable = match (self.region(left), self.region(right)) {
                (Some(a), Some(b)) => a.free && b.free && a.end() == b.base,
                _ => false,
            };
            if !mergeable {
                position += 1;
                continue;
            }

            let absorbed = self.vacate(right).reserved_len;
            self.order.remove(position + 1);
            if let Some(survivor) = self.region_mut(left) {
                survivor.reserved_len += absorbed;
                trace!(
                    "merged free regions into {}..{}",
                    survivor.base,
                    survivor.end()
                );
            }
        }
    }

    /// Verify the ordering, shape and coalescing invariants.
    ///
    /// # Errors
    /// The first violation found, in address order.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let mut previous: Option<&Region> = None;
        for &id in &self.order {
            let region = self.region(id).ok_or(InvariantViolation::DanglingIndex)?;

            if !region.base.is_page_aligned()
                || region.reserved_len == 0
                || !is_page_aligned(region.reserved_len)
            {
                return Err(InvariantViolation::Misshapen(region.base));
            }
            if round_up_to_page(region.requested_len).is_none_or(|r| r > region.reserved_len) {
                return Err(InvariantViolation::Undersized(region.base));
            }
            if let Some(prev) = previous {
                if prev.end() > region.base {
                    return Err(InvariantViolation::Overlap(prev.base, region.base));
                }
                if prev.free && region.free && prev.end() == region.base {
                    return Err(InvariantViolation::AdjacentFree(prev.base, region.base));
                }
            }
            previous = Some(region);
        }
        Ok(())
    }

    /// Hand out part of the free region at `position`, placing the new live
    /// region at `addr`.
    fn carve(
        &mut self,
        position: usize,
        addr: VirtualAddress,
        length: u64,
        rounded: u64,
    ) -> Result<RegionId, RegistryError> {
        let candidate_id = self.order[position];
        let candidate = self
            .region(candidate_id)
            .ok_or(RegistryError::StaleHandle(candidate_id))?;
        let (base, end) = (candidate.base, candidate.end());
        let leftover = candidate.reserved_len - rounded;

        if addr != base {
            // Hole before the new region stays with the candidate; whatever is
            // left above it becomes a hole of its own.
            let tail_start = VirtualAddress::new(addr.as_u64() + rounded);
            let tail_len = end.as_u64() - tail_start.as_u64();
            let needed = if tail_len > 0 { 2 } else { 1 };
            self.reserve(needed)?;

            let live = self.occupy(Region::live(addr, length, rounded));
            self.order.insert(position + 1, live);
            if tail_len > 0 {
                let tail = self.occupy(Region::hole(tail_start, tail_len));
                self.order.insert(position + 2, tail);
            }
            if let Some(candidate) = self.region_mut(candidate_id) {
                candidate.reserved_len = addr.as_u64() - base.as_u64();
            }
            debug!("split free region {base}..{end}: live {addr} (+{rounded:#x})");
            return Ok(live);
        }

        if leftover >= PAGE_SIZE {
            self.reserve(1)?;
            let live = self.occupy(Region::live(base, length, rounded));
            self.order.insert(position, live);
            if let Some(candidate) = self.region_mut(candidate_id) {
                candidate.base = VirtualAddress::new(base.as_u64() + rounded);
                candidate.reserved_len = leftover;
            }
            debug!("took {rounded:#x} bytes from the front of free region {base}..{end}");
            return Ok(live);
        }

        if let Some(candidate) = self.region_mut(candidate_id) {
            candidate.free = false;
            candidate.requested_len = length;
        }
        debug!("reusing free region {base}..{end} as is");
        Ok(candidate_id)
    }

    /// Create a live region at the high-water mark and move the mark past it.
    fn append(
        &mut self,
        high_water: &mut VirtualAddress,
        length: u64,
        rounded: u64,
    ) -> Result<RegionId, RegistryError> {
        let base = *high_water;
        let end = base
            .checked_add(rounded)
            .filter(|end| *end <= self.ceiling)
            .ok_or(RegistryError::OutOfAddressSpace { length })?;

        self.reserve(1)?;
        let id = self.occupy(Region::live(base, length, rounded));
        let position = self
            .order
            .partition_point(|&other| self.region(other).is_some_and(|r| r.base < base));
        self.order.insert(position, id);
        *high_water = end;

        debug!("new region {base}..{end}, high-water mark now {end}");
        Ok(id)
    }

    /// Make room for `n` more regions without touching any existing one.
    fn reserve(&mut self, n: usize) -> Result<(), RegistryError> {
        let fresh = n.saturating_sub(self.vacant.len());
        self.slots
            .try_reserve(fresh)
            .map_err(|_| RegistryError::OutOfMemory)?;
        self.order
            .try_reserve(n)
            .map_err(|_| RegistryError::OutOfMemory)
    }

    /// Store `region` in a vacant or fresh slot. Capacity must be reserved.
    #[allow(clippy::cast_possible_truncation)]
    fn occupy(&mut self, region: Region) -> RegionId {
        if let Some(index) = self.vacant.pop() {
            let slot = &mut self.slots[index as usize];
            slot.region = Some(region);
            return RegionId {
                index,
                generation: slot.generation,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            region: Some(region),
        });
        RegionId {
            index,
            generation: 0,
        }
    }

    /// Empty the slot of `id`, invalidating every copy of the handle.
    ///
    /// # Panics
    /// If `id` is stale; callers only pass handles taken from the order index.
    fn vacate(&mut self, id: RegionId) -> Region {
        let slot = &mut self.slots[id.index as usize];
        assert_eq!(slot.generation, id.generation, "vacating stale region {id:?}");
        let region = slot
            .region
            .take()
            .unwrap_or_else(|| panic!("vacating empty region slot {id:?}"));
        slot.generation = slot.generation.wrapping_add(1);
        self.vacant.push(id.index);
        region
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: u64 = 0x3000;

    fn registry() -> (RegionRegistry, VirtualAddress) {
        (RegionRegistry::new(), VirtualAddress::new(START))
    }

    fn acquire(
        registry: &mut RegionRegistry,
        high_water: &mut VirtualAddress,
        hint: u64,
        length: u64,
    ) -> (RegionId, u64) {
        let id = registry
            .acquire_region(VirtualAddress::new(hint), length, high_water)
            .expect("acquire");
        let base = registry.region(id).expect("live").base().as_u64();
        (id, base)
    }

    fn layout(registry: &RegionRegistry) -> Vec<(u64, u64, bool)> {
        registry
            .iter()
            .map(|(_, r)| (r.base().as_u64(), r.reserved_len(), r.is_free()))
            .collect()
    }

    #[test]
    fn best_fit_clamps_hint_into_region() {
        let hole = Region::hole(VirtualAddress::new(0x4000), 0x4000);
        let fit = |hint| find_best_fit_address(&hole, VirtualAddress::new(hint), 0x1000).as_u64();

        assert_eq!(fit(0), 0x4000);
        assert_eq!(fit(0x4000), 0x4000);
        assert_eq!(fit(0x5000), 0x5000);
        assert_eq!(fit(0x7000), 0x7000);
        assert_eq!(fit(0x7001), 0x7000);
        assert_eq!(fit(0x9000), 0x7000);
    }

    #[test]
    fn fresh_regions_grow_the_high_water_mark() {
        let (mut r, mut hw) = registry();
        let (_, a) = acquire(&mut r, &mut hw, 0, 10);
        let (_, b) = acquire(&mut r, &mut hw, 0, 0x1001);

        assert_eq!(a, START);
        assert_eq!(b, START + 0x1000);
        assert_eq!(hw.as_u64(), START + 0x3000);
        assert_eq!(r.len(), 2);
    }

    #[test]
    fn zero_length_is_rejected() {
        let (mut r, mut hw) = registry();
        assert_eq!(
            r.acquire_region(VirtualAddress::zero(), 0, &mut hw),
            Err(RegistryError::EmptyRange)
        );
        assert!(r.is_empty());
    }

    #[test]
    fn ceiling_bounds_growth() {
        let mut r = RegionRegistry::with_ceiling(VirtualAddress::new(START + 0x2000));
        let mut hw = VirtualAddress::new(START);
        acquire(&mut r, &mut hw, 0, 0x2000);

        assert_eq!(
            r.acquire_region(VirtualAddress::zero(), 1, &mut hw),
            Err(RegistryError::OutOfAddressSpace { length: 1 })
        );
        assert_eq!(hw.as_u64(), START + 0x2000);
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn exact_fit_reuses_the_hole_in_place() {
        let (mut r, mut hw) = registry();
        let (a, base) = acquire(&mut r, &mut hw, 0, 0x1000);
        acquire(&mut r, &mut hw, 0, 0x1000);
        r.release_region(a).expect("release");

        let (again, again_base) = acquire(&mut r, &mut hw, 0, 0x800);
        assert_eq!(again, a);
        assert_eq!(again_base, base);
        assert_eq!(r.region(again).expect("live").requested_len(), 0x800);
    }

    #[test]
    fn shrink_from_front_keeps_the_remainder_free() {
        let (mut r, mut hw) = registry();
        let (a, _) = acquire(&mut r, &mut hw, 0, 0x3000);
        r.release_region(a).expect("release");

        let (_, base) = acquire(&mut r, &mut hw, 0, 0x1000);
        assert_eq!(base, START);
        assert_eq!(
            layout(&r),
            vec![(START, 0x1000, false), (START + 0x1000, 0x2000, true)]
        );
    }

    #[test]
    fn hint_inside_a_hole_splits_it_three_ways() {
        let (mut r, mut hw) = registry();
        let (a, _) = acquire(&mut r, &mut hw, 0, 0x4000);
        r.release_region(a).expect("release");

        let (_, base) = acquire(&mut r, &mut hw, START + 0x1000, 0x1000);
        assert_eq!(base, START + 0x1000);
        assert_eq!(
            layout(&r),
            vec![
                (START, 0x1000, true),
                (START + 0x1000, 0x1000, false),
                (START + 0x2000, 0x2000, true),
            ]
        );
    }

    #[test]
    fn hint_past_a_hole_takes_its_tail() {
        let (mut r, mut hw) = registry();
        let (a, _) = acquire(&mut r, &mut hw, 0, 0x3000);
        acquire(&mut r, &mut hw, 0, 0x1000);
        r.release_region(a).expect("release");

        let (_, base) = acquire(&mut r, &mut hw, 0x10_0000, 0x1000);
        assert_eq!(base, START + 0x2000);
        assert_eq!(
            layout(&r),
            vec![
                (START, 0x2000, true),
                (START + 0x2000, 0x1000, false),
                (START + 0x3000, 0x1000, false),
            ]
        );
    }

    #[test]
    fn scan_prefers_the_hole_closest_to_the_hint() {
        let (mut r, mut hw) = registry();
        let (a, _) = acquire(&mut r, &mut hw, 0, 0x1000);
        acquire(&mut r, &mut hw, 0, 0x1000);
        let (c, _) = acquire(&mut r, &mut hw, 0, 0x1000);
        acquire(&mut r, &mut hw, 0, 0x1000);
        r.release_region(a).expect("release a");
        r.release_region(c).expect("release c");

        let (id, base) = acquire(&mut r, &mut hw, START + 0x2000, 0x1000);
        assert_eq!(id, c);
        assert_eq!(base, START + 0x2000);
    }

    #[test]
    fn hint_is_aligned_down() {
        let (mut r, mut hw) = registry();
        let (a, _) = acquire(&mut r, &mut hw, 0, 0x3000);
        r.release_region(a).expect("release");

        let (_, base) = acquire(&mut r, &mut hw, START + 0x1234, 0x1000);
        assert_eq!(base, START + 0x1000);
    }

    #[test]
    fn release_merges_both_neighbours() {
        let (mut r, mut hw) = registry();
        let (a, _) = acquire(&mut r, &mut hw, 0, 0x1000);
        let (b, _) = acquire(&mut r, &mut hw, 0, 0x1000);
        let (c, _) = acquire(&mut r, &mut hw, 0, 0x1000);

        r.release_region(a).expect("a");
        r.release_region(c).expect("c");
        assert_eq!(r.len(), 3);

        r.release_region(b).expect("b");
        assert_eq!(layout(&r), vec![(START, 0x3000, true)]);
        assert!(r.region(b).is_none());
        assert!(r.region(c).is_none());
    }

    #[test]
    fn releasing_twice_is_an_error() {
        let (mut r, mut hw) = registry();
        let (a, _) = acquire(&mut r, &mut hw, 0, 0x1000);
        acquire(&mut r, &mut hw, 0, 0x1000);
        r.release_region(a).expect("first");
        assert_eq!(r.release_region(a), Err(RegistryError::AlreadyFree(a)));
    }

    #[test]
    fn stale_handles_do_not_alias_recycled_slots() {
        let (mut r, mut hw) = registry();
        let (a, _) = acquire(&mut r, &mut hw, 0, 0x1000);
        let (b, _) = acquire(&mut r, &mut hw, 0, 0x1000);
        acquire(&mut r, &mut hw, 0, 0x1000);
        r.release_region(a).expect("a");
        r.release_region(b).expect("b");

        // b's slot is recycled by the split below; the old handle must not see it.
        let (fresh, _) = acquire(&mut r, &mut hw, START + 0x1000, 0x1000);
        assert_ne!(fresh, b);
        assert!(r.region(b).is_none());
        assert_eq!(r.release_region(b), Err(RegistryError::StaleHandle(b)));
    }

    #[test]
    fn lookups_only_see_live_regions() {
        let (mut r, mut hw) = registry();
        let (a, base) = acquire(&mut r, &mut hw, 0, 10);
        acquire(&mut r, &mut hw, 0, 10);

        let base = VirtualAddress::new(base);
        assert_eq!(r.find_region(base, 10), Some(a));
        assert_eq!(r.find_region(base, 11), None);
        assert!(r.contains(base + 0xFFF));

        r.release_region(a).expect("release");
        assert_eq!(r.find_region(base, 10), None);
        assert!(!r.contains(base));
    }

    #[test]
    fn coalesce_collapses_long_free_runs() {
        let (mut r, mut hw) = registry();
        let ids: Vec<_> = (0..5).map(|_| acquire(&mut r, &mut hw, 0, 0x1000).0).collect();
        acquire(&mut r, &mut hw, 0, 0x1000);

        for &id in &ids {
            r.region_mut(id).expect("live").mark_free();
        }
        assert!(r.check_invariants().is_err());

        r.coalesce();
        assert_eq!(r.check_invariants(), Ok(()));
        assert_eq!(layout(&r)[0], (START, 0x5000, true));
        assert_eq!(r.len(), 2);
    }
}
