//! Convenience macros for unit development.

/// Builds a [`UnitInfo`](crate::unit::UnitInfo).
///
/// # Example
/// ```rust,ignore
/// let info = unit_info!(
///     name: "Greeter",
///     version: "1.0.0",
///     author: "ops"
/// );
/// ```
#[macro_export]
macro_rules! unit_info {
    (
        name: $name:expr,
        version: $version:expr
        $(, author: $author:expr)?
        $(, description: $desc:expr)?
        $(, core: $core:expr)?
        $(, manual_subscriptions: $manual:expr)?
        $(,)?
    ) => {{
        #[allow(unused_mut)]
        let mut info = $crate::unit::UnitInfo::new(
            $name,
            $crate::__private::semver::Version::parse($version)
                .unwrap_or_else(|_| $crate::__private::semver::Version::new(0, 0, 0)),
        );
        $( info.author = $author.to_string(); )?
        $( info.description = $desc.to_string(); )?
        $( info.is_core = $core; )?
        $( info.manual_subscriptions = $manual; )?
        info
    }};
}

/// Builds [`HookArgs`](crate::hooks::HookArgs). Prefix a value with `ref`
/// to pass it by reference.
///
/// # Example
/// ```rust,ignore
/// let mut args = hook_args![player_id, "hello", ref 10.0];
/// ```
#[macro_export]
macro_rules! hook_args {
    () => {
        $crate::hooks::HookArgs::new()
    };
    ($($rest:tt)+) => {{
        let mut args = $crate::hooks::HookArgs::new();
        $crate::__hook_args_push!(args; $($rest)+);
        args
    }};
}

#[doc(hidden)]
#[macro_export]
macro_rules! __hook_args_push {
    ($args:ident;) => {};
    ($args:ident; ref $value:expr $(, $($rest:tt)*)?) => {
        $args.push($crate::hooks::HookValue::from($value), $crate::hooks::ArgMode::InOut);
        $( $crate::__hook_args_push!($args; $($rest)*); )?
    };
    ($args:ident; $value:expr $(, $($rest:tt)*)?) => {
        $args.push($crate::hooks::HookValue::from($value), $crate::hooks::ArgMode::In);
        $( $crate::__hook_args_push!($args; $($rest)*); )?
    };
}

#[cfg(test)]
mod tests {
    use crate::hooks::{ArgMode, HookValue};

    #[test]
    fn test_unit_info_macro() {
        let info = unit_info!(name: "Greeter", version: "1.2.3", author: "ops");
        assert_eq!(info.name, "Greeter");
        assert_eq!(info.version, semver::Version::new(1, 2, 3));
        assert_eq!(info.author, "ops");
        assert!(!info.manual_subscriptions);
    }

    #[test]
    fn test_hook_args_macro() {
        let args = hook_args![7, "hi", ref 1.5];
        assert_eq!(args.len(), 3);
        assert_eq!(args.get(1), Some(&HookValue::from("hi")));
        assert_eq!(args.mode(0), Some(ArgMode::In));
        assert_eq!(args.mode(2), Some(ArgMode::InOut));
        assert!(hook_args![].is_empty());
    }
}
