use rand::Rng;

use common::RoomCode;

const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const ROOM_CODE_LENGTH: usize = 6;

pub fn generate_room_code<R: Rng + ?Sized>(rng: &mut R) -> RoomCode {
    let code: String = (0..ROOM_CODE_LENGTH)
        .map(|_| ROOM_CODE_ALPHABET[rng.random_range(0..ROOM_CODE_ALPHABET.len())] as char)
        .collect();
    RoomCode::new(code)
}

/// Draws codes until one is not taken by a live room.
pub fn generate_unique_room_code(is_taken: impl Fn(&RoomCode) -> bool) -> RoomCode {
    let mut rng = rand::rng();
    loop {
        let code = generate_room_code(&mut rng);
        if !is_taken(&code) {
            return code;
        }
    }
}
