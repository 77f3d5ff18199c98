/// Landing page for signed-in users
///
/// ## Route
/// GET / (protected by `require_auth`)
pub async fn index() -> &'static str {
    "Hello World"
}
