use rand::RngCore;
use rocket::Request;

/// Sets the proof in the request's local cache, so other guards can access it.
pub(crate) fn set_proof_in_cache<P: Send + Sync + 'static>(request: &Request<'_>, proof: P) {
    request.local_cache(|| Some(proof));
}

/// Fills a buffer of the given length from the thread-local CSPRNG.
pub(crate) fn random_bytes(len: usize) -> Result<Vec<u8>, rand::Error> {
    let mut buf = vec![0; len];
    rand::thread_rng().try_fill_bytes(&mut buf)?;
    Ok(buf)
}
