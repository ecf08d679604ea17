// implementation of the multicast channel.
//
// the architecture is as such:
//
// channel handles wrap around Rc<RefCell<core state>>
//                                         |
//          /------------------------------/
//          v
//       core state
//          |
//          |------ it contains the log, an append-only Vec<T> arena. nothing is ever removed from
//          |       it, because different cursors may be at different offsets.
//          |
//          |------ it contains the state: active, closed, or errored with a cause. once terminal,
//          |       it never changes again.
//          |
//          \------ it contains the shared wake signal, a Deferred which is resolved and replaced
//                  every time something happens, so that every waiting cursor wakes together.
//
// cursors hold an index into the log rather than a pointer, plus a private closed flag and a
// private wake signal used to interrupt only their own pending pull.
//
// the organization of these modules is as such:
//
//      core: plain data structure which knows how to append, terminate, and advance an index. it
//       ^    never waits and never wakes anything itself.
//       |
//      api: the exposed Channel and Cursor handles. these layer waiting, waking, and per-cursor
//           serialization of pulls on top of core.

pub(crate) mod api;

mod core;
