use rand::Rng;

/// Seed for the throwaway wrapped-SOL account each swap creates and closes.
pub fn generate_random_seed() -> String {
    let random_bytes: Vec<u8> = (0..16).map(|_| rand::thread_rng().gen::<u8>()).collect();

    bs58::encode(random_bytes).into_string()
}
