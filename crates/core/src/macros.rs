// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Declarative macros for the model types.

/// `Display` for a fieldless enum from a variant-to-name table.
///
/// ```ignore
/// crate::simple_display! {
///     JobResult {
///         Passed => "Passed",
///         Failed => "Failed",
///     }
/// }
/// ```
#[macro_export]
macro_rules! simple_display {
    ($enum:ty { $( $variant:ident => $name:expr ),+ $(,)? }) => {
        impl std::fmt::Display for $enum {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(match self {
                    $( Self::$variant => $name, )+
                })
            }
        }
    };
}

/// Test builder for a model struct, available under `test-support`.
///
/// `set` fields take their type directly; `option` fields are `Option`s
/// on the target and their setter wraps the value in `Some`. Every target
/// field must be listed.
///
/// ```ignore
/// crate::builder! {
///     pub struct JobInstanceBuilder => JobInstance {
///         set { state: JobState = JobState::Scheduled }
///         option { assigned_agent: String = None }
///     }
/// }
/// ```
#[macro_export]
macro_rules! builder {
    (
        pub struct $builder:ident => $target:ident {
            set { $( $field:ident : $ty:ty = $default:expr ),* $(,)? }
            $(option { $( $opt:ident : $opt_ty:ty = $opt_default:expr ),* $(,)? })?
        }
    ) => {
        #[cfg(any(test, feature = "test-support"))]
        pub struct $builder {
            $( $field: $ty, )*
            $($( $opt: Option<$opt_ty>, )*)?
        }

        #[cfg(any(test, feature = "test-support"))]
        impl Default for $builder {
            fn default() -> Self {
                Self {
                    $( $field: $default, )*
                    $($( $opt: $opt_default, )*)?
                }
            }
        }

        #[cfg(any(test, feature = "test-support"))]
        impl $builder {
            $(
                pub fn $field(mut self, v: $ty) -> Self {
                    self.$field = v;
                    self
                }
            )*
            $($(
                pub fn $opt(mut self, v: impl Into<$opt_ty>) -> Self {
                    self.$opt = Some(v.into());
                    self
                }
            )*)?

            pub fn build(self) -> $target {
                $target {
                    $( $field: self.$field, )*
                    $($( $opt: self.$opt, )*)?
                }
            }
        }

        #[cfg(any(test, feature = "test-support"))]
        impl $target {
            pub fn builder() -> $builder {
                $builder::default()
            }
        }
    };
}

/// Chained by-value setters, expanded inside an `impl` block.
///
/// ```ignore
/// impl JobPlan {
///     crate::setters! {
///         into { artifact_location: String }
///         set { tasks: Vec<Task> }
///     }
/// }
/// ```
#[macro_export]
macro_rules! setters {
    (
        $(into { $( $into:ident : $into_ty:ty ),* $(,)? })?
        $(set { $( $field:ident : $ty:ty ),* $(,)? })?
    ) => {
        $($(
            pub fn $into(mut self, v: impl Into<$into_ty>) -> Self {
                self.$into = v.into();
                self
            }
        )*)?
        $($(
            pub fn $field(mut self, v: $ty) -> Self {
                self.$field = v;
                self
            }
        )*)?
    };
}
