//! Call models for known external functions.
//!
//! Each model lists, per pointer argument, whether the call reads or
//! writes through it and how many bytes are covered (a fixed size, a
//! size taken from another argument, or unknown). The solver consumes
//! only the resulting mod/ref bits: a call whose model proves it cannot
//! write the queried location does not clobber a load being forwarded.
//!
//! errno is not part of the analyzed object space; calls that touch only
//! errno read back as having no pointer-argument effects.

/// Whether an operation may read or write a location.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModRef {
    NoModRef,
    Ref,
    Mod,
    ModRefBoth,
}

impl ModRef {
    pub fn join(self, other: ModRef) -> ModRef {
        use ModRef::*;
        match (self, other) {
            (NoModRef, x) | (x, NoModRef) => x,
            (Ref, Ref) => Ref,
            (Mod, Mod) => Mod,
            _ => ModRefBoth,
        }
    }

    pub fn may_write(self) -> bool {
        matches!(self, ModRef::Mod | ModRef::ModRefBoth)
    }

    pub fn may_read(self) -> bool {
        matches!(self, ModRef::Ref | ModRef::ModRefBoth)
    }
}

/// How many bytes an argument location covers.
#[derive(Clone, Copy, Debug)]
pub enum LocSize {
    Unknown,
    Fixed(u64),
    /// Size in the integer argument at this index.
    FromArg(usize),
    /// Element count in the argument at this index, times a stride.
    FromArgTimes(usize, u64),
}

#[derive(Clone, Copy, Debug)]
pub struct ArgLoc {
    pub arg: usize,
    pub effect: ModRef,
    pub size: LocSize,
}

#[derive(Clone, Copy, Debug)]
pub struct CallModel {
    pub name: &'static str,
    pub locs: &'static [ArgLoc],
}

const fn m(arg: usize, size: LocSize) -> ArgLoc {
    ArgLoc { arg, effect: ModRef::Mod, size }
}

const fn r(arg: usize, size: LocSize) -> ArgLoc {
    ArgLoc { arg, effect: ModRef::Ref, size }
}

/// Functions whose only effects are on errno / kernel state.
const NO_LOCS: &[ArgLoc] = &[];

static MODELS: &[CallModel] = &[
    CallModel { name: "open", locs: &[r(0, LocSize::Unknown)] },
    CallModel { name: "read", locs: &[m(1, LocSize::FromArg(2))] },
    CallModel { name: "write", locs: &[r(1, LocSize::FromArg(2))] },
    CallModel { name: "lseek", locs: NO_LOCS },
    CallModel { name: "llseek", locs: NO_LOCS },
    CallModel { name: "lseek64", locs: NO_LOCS },
    CallModel { name: "close", locs: NO_LOCS },
    CallModel { name: "free", locs: NO_LOCS },
    CallModel { name: "malloc", locs: NO_LOCS },
    CallModel { name: "calloc", locs: NO_LOCS },
    CallModel { name: "realloc", locs: &[r(0, LocSize::Unknown)] },
    CallModel { name: "isatty", locs: NO_LOCS },
    CallModel { name: "stat", locs: &[r(0, LocSize::Unknown), m(1, LocSize::Fixed(144))] },
    CallModel { name: "fstat", locs: &[m(1, LocSize::Fixed(144))] },
    CallModel { name: "time", locs: &[m(0, LocSize::Fixed(8))] },
    CallModel { name: "gettimeofday", locs: &[m(0, LocSize::Fixed(16)), m(1, LocSize::Fixed(8))] },
    CallModel { name: "clock_gettime", locs: &[m(1, LocSize::Fixed(16))] },
    CallModel { name: "clock_getres", locs: &[m(1, LocSize::Fixed(16))] },
    CallModel { name: "nanosleep", locs: &[r(0, LocSize::Fixed(16)), m(1, LocSize::Fixed(16))] },
    CallModel { name: "poll", locs: &[m(0, LocSize::FromArgTimes(1, 8))] },
    CallModel { name: "socket", locs: NO_LOCS },
    CallModel { name: "bind", locs: &[r(1, LocSize::FromArg(2))] },
    CallModel { name: "listen", locs: NO_LOCS },
    CallModel { name: "shutdown", locs: NO_LOCS },
    CallModel { name: "setsockopt", locs: &[r(3, LocSize::FromArg(4))] },
    CallModel { name: "getsockname", locs: &[m(1, LocSize::Unknown), m(2, LocSize::Fixed(4))] },
    CallModel {
        name: "accept",
        locs: &[m(1, LocSize::Unknown), m(2, LocSize::Fixed(4))],
    },
    CallModel {
        name: "recvfrom",
        locs: &[m(1, LocSize::FromArg(2)), m(4, LocSize::Unknown), m(5, LocSize::Fixed(4))],
    },
    CallModel { name: "sendto", locs: &[r(1, LocSize::FromArg(2)), r(4, LocSize::Unknown)] },
    CallModel { name: "getrlimit", locs: &[m(1, LocSize::Fixed(16))] },
    CallModel { name: "sigprocmask", locs: &[r(1, LocSize::Fixed(128)), m(2, LocSize::Fixed(128))] },
    CallModel { name: "sigaction", locs: &[r(1, LocSize::Unknown), m(2, LocSize::Unknown)] },
    CallModel { name: "uname", locs: &[m(0, LocSize::Fixed(390))] },
    CallModel { name: "getdents64", locs: &[m(1, LocSize::FromArg(2))] },
    CallModel { name: "mkdir", locs: &[r(0, LocSize::Unknown)] },
    CallModel { name: "rmdir", locs: &[r(0, LocSize::Unknown)] },
    CallModel { name: "unlink", locs: &[r(0, LocSize::Unknown)] },
    CallModel { name: "rename", locs: &[r(0, LocSize::Unknown), r(1, LocSize::Unknown)] },
    CallModel { name: "getpid", locs: NO_LOCS },
    CallModel { name: "getuid", locs: NO_LOCS },
    CallModel { name: "geteuid", locs: NO_LOCS },
    CallModel { name: "getgid", locs: NO_LOCS },
    CallModel { name: "getegid", locs: NO_LOCS },
    CallModel { name: "setuid", locs: NO_LOCS },
    CallModel { name: "setgid", locs: NO_LOCS },
    CallModel { name: "kill", locs: NO_LOCS },
    CallModel { name: "brk", locs: NO_LOCS },
];

/// Look up the model for an external function, if we have one.
pub fn model_for(name: &str) -> Option<&'static CallModel> {
    MODELS.iter().find(|model| model.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_writes_its_buffer_only() {
        let model = model_for("read").unwrap();
        assert_eq!(model.locs.len(), 1);
        assert_eq!(model.locs[0].arg, 1);
        assert!(model.locs[0].effect.may_write());
    }

    #[test]
    fn errno_only_calls_have_no_locations() {
        assert!(model_for("close").unwrap().locs.is_empty());
        assert!(model_for("getpid").unwrap().locs.is_empty());
    }

    #[test]
    fn unknown_externals_have_no_model() {
        assert!(model_for("mystery_function").is_none());
    }

    #[test]
    fn modref_join_saturates() {
        assert_eq!(ModRef::Ref.join(ModRef::Mod), ModRef::ModRefBoth);
        assert_eq!(ModRef::NoModRef.join(ModRef::Ref), ModRef::Ref);
        assert_eq!(ModRef::Mod.join(ModRef::Mod), ModRef::Mod);
    }
}
