#![forbid(unsafe_code)]

//! Typed models over [`Channel`](crate::Channel).
//!
//! [`model!`](crate::model) declares a newtype around a channel with one
//! getter and one setter per field. The setter goes through the same
//! write pipeline as [`Channel::set`](crate::Channel::set); the getter reads
//! and converts with [`FromValue`](crate::FromValue).
//!
//! ```ignore
//! use modelly::{model, SharedScheduler};
//!
//! model! {
//!     /// Signed-in user.
//!     pub struct User {
//!         fetching: bool => set_fetching,
//!         display_name: String => set_display_name,
//!         email: String => set_email,
//!     }
//! }
//!
//! model! {
//!     pub struct Auth {
//!         current_user: User => set_current_user,
//!     }
//! }
//!
//! let auth = Auth::new(scheduler.clone());
//! auth.set_current_user(User::new(scheduler));
//! auth.current_user().unwrap().set_email("edsger@mail.com");
//! ```
//!
//! Field keys are the Rust field names. Generated models deref to
//! [`Channel`](crate::Channel), so `on`, `once`, `listen`, `delete` and
//! `snapshot` are available directly. A generated model converts to and from
//! [`Value`](crate::Value), so models nest inside other models.

/// Declare a typed model. See the [module docs](crate::model).
#[macro_export]
macro_rules! model {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$field_meta:meta])*
                $field:ident : $ty:ty => $setter:ident
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug)]
        $vis struct $name($crate::Channel);

        impl $name {
            /// Create an empty model.
            #[must_use]
            $vis fn new(scheduler: $crate::SharedScheduler) -> Self {
                Self($crate::Channel::new(scheduler))
            }

            /// The underlying channel.
            #[must_use]
            $vis fn channel(&self) -> &$crate::Channel {
                &self.0
            }

            $(
                $(#[$field_meta])*
                #[must_use]
                $vis fn $field(&self) -> ::core::option::Option<$ty> {
                    self.0
                        .get(::core::stringify!($field))
                        .and_then(|value| <$ty as $crate::FromValue>::from_value(&value))
                }

                $vis fn $setter(&self, value: impl ::core::convert::Into<$ty>) {
                    let value: $ty = value.into();
                    self.0.set(::core::stringify!($field), $crate::Value::from(value));
                }
            )*
        }

        impl ::core::ops::Deref for $name {
            type Target = $crate::Channel;

            fn deref(&self) -> &$crate::Channel {
                &self.0
            }
        }

        impl ::core::convert::From<$crate::Channel> for $name {
            fn from(channel: $crate::Channel) -> Self {
                Self(channel)
            }
        }

        impl ::core::convert::From<$name> for $crate::Value {
            fn from(model: $name) -> Self {
                $crate::Value::Channel(model.0)
            }
        }

        impl $crate::FromValue for $name {
            fn from_value(value: &$crate::Value) -> ::core::option::Option<Self> {
                value.as_channel().cloned().map(Self)
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::{FrameScheduler, Record, SharedScheduler, Value, events};
    use std::cell::Cell;
    use std::rc::Rc;

    crate::model! {
        struct Profile {
            /// Display name.
            name: String => set_name,
            age: i64 => set_age,
            admin: bool => set_admin,
        }
    }

    crate::model! {
        struct Team {
            lead: Profile => set_lead,
        }
    }

    fn frames() -> (Rc<FrameScheduler>, SharedScheduler) {
        let frames = Rc::new(FrameScheduler::new());
        let shared = Rc::clone(&frames) as SharedScheduler;
        (frames, shared)
    }

    #[test]
    fn typed_accessors_round_through_channel() {
        let (_frames, shared) = frames();
        let p = Profile::new(shared);
        assert_eq!(p.name(), None);
        p.set_name("Ada");
        p.set_age(36);
        p.set_admin(true);
        assert_eq!(p.name().as_deref(), Some("Ada"));
        assert_eq!(p.age(), Some(36));
        assert_eq!(p.admin(), Some(true));
        assert_eq!(
            p.snapshot(),
            Record::new().with("name", "Ada").with("age", 36).with("admin", true)
        );
    }

    #[test]
    fn getter_returns_none_on_type_mismatch() {
        let (_frames, shared) = frames();
        let p = Profile::new(shared);
        p.set("age", "old");
        assert_eq!(p.age(), None);
    }

    #[test]
    fn nested_model_links_and_unlinks() {
        let (frames, shared) = frames();
        let team = Team::new(Rc::clone(&shared));
        let first = Profile::new(Rc::clone(&shared));
        let second = Profile::new(shared);

        team.set_lead(first.clone());
        assert_eq!(first.listener_count(events::UPDATE), 1);
        assert!(team.lead().unwrap().ptr_eq(&first));

        team.set_lead(second.clone());
        assert_eq!(first.listener_count(events::UPDATE), 0);
        assert_eq!(second.listener_count(events::UPDATE), 1);
        frames.run_frame();

        let count = Rc::new(Cell::new(0));
        let count_clone = Rc::clone(&count);
        team.listen(&crate::Listener::new(move |_| count_clone.set(count_clone.get() + 1)));

        first.set_name("stale");
        frames.run_frame();
        assert_eq!(count.get(), 0);

        second.set_name("fresh");
        frames.run_frame();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn model_converts_to_value() {
        let (_frames, shared) = frames();
        let p = Profile::new(shared);
        let v = Value::from(p.clone());
        assert!(v.as_channel().unwrap().ptr_eq(p.channel()));
    }
}
