const ROMAN_TABLE: &[(i64, &str)] = &[
    (1000, "M"),
    (900, "CM"),
    (500, "D"),
    (400, "CD"),
    (100, "C"),
    (90, "XC"),
    (50, "L"),
    (40, "XL"),
    (10, "X"),
    (9, "IX"),
    (5, "V"),
    (4, "IV"),
    (1, "I"),
];

/// Subtractive-notation Roman numeral for a mark number. Zero and negative
/// numbers label nothing and return an empty string.
pub fn roman_numeral(number: i64) -> String {
    if number <= 0 {
        return String::new();
    }
    let mut remainder = number;
    let mut numeral = String::new();
    for (value, symbol) in ROMAN_TABLE {
        while remainder >= *value {
            numeral.push_str(symbol);
            remainder -= value;
        }
    }
    numeral
}

pub fn mark_label(number: i64) -> String {
    format!("Mark {}", roman_numeral(number))
}

#[cfg(test)]
mod tests {
    use super::{mark_label, roman_numeral};

    #[test]
    fn zero_and_negative_numbers_have_no_numeral() {
        assert_eq!(roman_numeral(0), "");
        assert_eq!(roman_numeral(-3), "");
    }

    #[test]
    fn subtractive_forms() {
        assert_eq!(roman_numeral(1), "I");
        assert_eq!(roman_numeral(4), "IV");
        assert_eq!(roman_numeral(9), "IX");
        assert_eq!(roman_numeral(14), "XIV");
        assert_eq!(roman_numeral(40), "XL");
        assert_eq!(roman_numeral(90), "XC");
        assert_eq!(roman_numeral(400), "CD");
        assert_eq!(roman_numeral(900), "CM");
    }

    #[test]
    fn composite_numbers() {
        assert_eq!(roman_numeral(2024), "MMXXIV");
        assert_eq!(roman_numeral(3999), "MMMCMXCIX");
    }

    #[test]
    fn no_upper_bound() {
        assert_eq!(roman_numeral(5000), "MMMMM");
    }

    #[test]
    fn mark_labels() {
        assert_eq!(mark_label(1), "Mark I");
        assert_eq!(mark_label(7), "Mark VII");
    }
}
