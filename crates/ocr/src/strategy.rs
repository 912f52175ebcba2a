/// Try each strategy in order until one produces non-blank text.
///
/// Returns the winning strategy with its trimmed text, or `None` when every
/// strategy came back blank. An error from any strategy stops the search.
pub fn first_non_empty<S, E>(
    strategies: &[S],
    mut attempt: impl FnMut(S) -> Result<String, E>,
) -> Result<Option<(S, String)>, E>
where
    S: Copy + std::fmt::Debug,
{
    for (i, &strategy) in strategies.iter().enumerate() {
        let text = attempt(strategy)?;
        let text = text.trim();
        if !text.is_empty() {
            return Ok(Some((strategy, text.to_string())));
        }
        if let Some(next) = strategies.get(i + 1) {
            tracing::warn!("{strategy:?} produced no text; falling back to {next:?}");
        }
    }
    Ok(None)
}
