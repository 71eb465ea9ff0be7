// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use bitflags::bitflags;

bitflags! {
    /// A POSIX-style `rwxrwxrwx` permission bitmap: three nibble-sized
    /// (well, `07`-sized) groups for owner, group, and other.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Mode: u32 {
        const OWNER_READ = 0o400;
        const OWNER_WRITE = 0o200;
        const OWNER_EXEC = 0o100;
        const GROUP_READ = 0o040;
        const GROUP_WRITE = 0o020;
        const GROUP_EXEC = 0o010;
        const OTHER_READ = 0o004;
        const OTHER_WRITE = 0o002;
        const OTHER_EXEC = 0o001;
    }
}

impl Mode {
    const OWNER_SHIFT: u32 = 6;
    const GROUP_SHIFT: u32 = 3;
    const OTHER_SHIFT: u32 = 0;

    const fn triple(self, shift: u32) -> u32 {
        (self.bits() >> shift) & 0o7
    }
}

/// The subset of a resource's stat info `check_permissions` needs: its
/// mode bits plus the identity of its owning user and group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Stat {
    pub mode: Mode,
    pub uid: u32,
    pub gid: u32,
}

/// The well-known superuser id. A caller presenting this uid bypasses all
/// mode checks, mirroring `perms.c`'s `if (UID == 0) return 0;` fast path.
pub const ROOT_UID: u32 = 0;

/// Checks whether a caller identified by `(caller_uid, caller_gid)` may
/// perform the access described by `requested` against a resource whose
/// metadata is `stat`.
///
/// Ported from the original core's `check_permissions`: the superuser
/// bypasses the check entirely; otherwise the owner triple, group triple,
/// or other triple of `stat.mode` is selected depending on whether the
/// caller's uid matches the resource's owner, the caller's gid matches the
/// resource's group, or neither, in that order. The selected triple must
/// contain every bit `requested` asks for in the *same* triple position
/// (the original's `(requested >> shift) & 07` selects which bits of
/// `requested` are being asked about at all).
///
/// The C original returns `(stat->st_mode ^ requested) & mask`, i.e. zero
/// on success; this is the equivalent boolean, true on success.
#[must_use]
pub fn check_permissions(stat: &Stat, caller_uid: u32, caller_gid: u32, requested: Mode) -> bool {
    if caller_uid == ROOT_UID {
        return true;
    }

    let shift = if stat.uid == caller_uid {
        Mode::OWNER_SHIFT
    } else if stat.gid == caller_gid {
        Mode::GROUP_SHIFT
    } else {
        Mode::OTHER_SHIFT
    };

    let wanted = requested.triple(shift);
    let granted = stat.mode.triple(shift);
    wanted & granted == wanted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat(mode: u32, uid: u32, gid: u32) -> Stat {
        Stat {
            mode: Mode::from_bits_truncate(mode),
            uid,
            gid,
        }
    }

    #[test]
    fn root_bypasses_everything() {
        let s = stat(0o000, 1, 1);
        assert!(check_permissions(&s, ROOT_UID, ROOT_UID, Mode::all()));
    }

    #[test]
    fn owner_is_checked_against_owner_bits() {
        let s = stat(0o640, 1, 1);
        assert!(check_permissions(&s, 1, 1, Mode::OWNER_READ));
        assert!(!check_permissions(&s, 1, 1, Mode::OWNER_EXEC));
    }

    #[test]
    fn group_member_is_checked_against_group_bits() {
        let s = stat(0o640, 1, 7);
        assert!(check_permissions(&s, 2, 7, Mode::GROUP_READ));
        assert!(!check_permissions(&s, 2, 7, Mode::GROUP_WRITE));
    }

    #[test]
    fn stranger_is_checked_against_other_bits() {
        let s = stat(0o644, 1, 1);
        assert!(check_permissions(&s, 9, 9, Mode::OTHER_READ));
        assert!(!check_permissions(&s, 9, 9, Mode::OTHER_WRITE));
    }
}
