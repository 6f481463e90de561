/// Route name for a method name.
///
/// The first letter is lower-cased and an `Auth` suffix turns the method
/// into a guard: `GetList` serves `getList`, `SessionAuth` guards `session`.
pub fn method_route(method: &str) -> String {
    let (base, guard) = match method.strip_suffix("Auth") {
        Some(base) => (base, true),
        None => (method, false),
    };
    let mut chars = base.chars();
    let mut route = match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    };
    if guard {
        route.push('!');
    }
    route
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lower_cases_first_letter() {
        assert_eq!(method_route("GetList"), "getList");
        assert_eq!(method_route("Func1"), "func1");
        assert_eq!(method_route("already"), "already");
    }

    #[test]
    fn auth_suffix_is_a_guard() {
        assert_eq!(method_route("SessionAuth"), "session!");
        assert_eq!(method_route("Auth"), "!");
    }
}
