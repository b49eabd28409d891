//! PIC18 mnemonics.

use std::fmt;

macro_rules! opcodes {
    ($($variant:ident => $name:literal),* $(,)?) => {
        /// PIC18 instructions, data directives, and the invalid marker.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Opcode {
            $($variant),*
        }

        impl Opcode {
            pub fn name(self) -> &'static str {
                match self {
                    $(Opcode::$variant => $name),*
                }
            }

            pub fn from_name(name: &str) -> Option<Opcode> {
                match name.to_ascii_uppercase().as_str() {
                    $($name => Some(Opcode::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

opcodes! {
    // byte-oriented file operations
    Addwf => "ADDWF", Addwfc => "ADDWFC", Andwf => "ANDWF", Clrf => "CLRF", Comf => "COMF",
    Cpfseq => "CPFSEQ", Cpfsgt => "CPFSGT", Cpfslt => "CPFSLT", Decf => "DECF",
    Decfsz => "DECFSZ", Dcfsnz => "DCFSNZ", Incf => "INCF", Incfsz => "INCFSZ",
    Infsnz => "INFSNZ", Iorwf => "IORWF", Movf => "MOVF", Movff => "MOVFF", Movwf => "MOVWF",
    Mulwf => "MULWF", Negf => "NEGF", Rlcf => "RLCF", Rlncf => "RLNCF", Rrcf => "RRCF",
    Rrncf => "RRNCF", Setf => "SETF", Subfwb => "SUBFWB", Subwf => "SUBWF", Subwfb => "SUBWFB",
    Swapf => "SWAPF", Tstfsz => "TSTFSZ", Xorwf => "XORWF",
    // bit-oriented file operations
    Bcf => "BCF", Bsf => "BSF", Btfsc => "BTFSC", Btfss => "BTFSS", Btg => "BTG",
    // control
    Bc => "BC", Bn => "BN", Bnc => "BNC", Bnn => "BNN", Bnov => "BNOV", Bnz => "BNZ",
    Bov => "BOV", Bra => "BRA", Bz => "BZ", Call => "CALL", Clrwdt => "CLRWDT", Daw => "DAW",
    Goto => "GOTO", Nop => "NOP", Pop => "POP", Push => "PUSH", Rcall => "RCALL",
    Reset => "RESET", Retfie => "RETFIE", Retlw => "RETLW", Return => "RETURN", Sleep => "SLEEP",
    // literal operations
    Addlw => "ADDLW", Andlw => "ANDLW", Iorlw => "IORLW", Lfsr => "LFSR", Movlb => "MOVLB",
    Movlw => "MOVLW", Mullw => "MULLW", Sublw => "SUBLW", Xorlw => "XORLW",
    // table operations
    Tblrd => "TBLRD", Tblwt => "TBLWT",
    // extended instruction set
    Addfsr => "ADDFSR", Addulnk => "ADDULNK", Callw => "CALLW", Movsf => "MOVSF",
    Movss => "MOVSS", Pushl => "PUSHL", Subfsr => "SUBFSR", Subulnk => "SUBULNK",
    // enhanced family
    Movffl => "MOVFFL", Movsfl => "MOVSFL",
    // data directives
    Db => "DB", Dw => "DW", De => "DE", Ascii => "ASCII", Idlocs => "__IDLOCS",
    Config => "CONFIG",
    Invalid => "invalid",
}

impl Opcode {
    /// Instructions that skip the next instruction when their test holds.
    pub fn is_skip(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            Cpfseq | Cpfsgt | Cpfslt | Tstfsz | Decfsz | Dcfsnz | Incfsz | Infsnz | Btfsc | Btfss
        )
    }

    /// Data directives occupy program memory but are not executable.
    pub fn is_data(self) -> bool {
        matches!(
            self,
            Opcode::Db | Opcode::Dw | Opcode::De | Opcode::Ascii | Opcode::Idlocs | Opcode::Config
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        assert_eq!(Opcode::from_name("movffl"), Some(Opcode::Movffl));
        assert_eq!(Opcode::Dcfsnz.to_string(), "DCFSNZ");
        assert_eq!(Opcode::from_name("FOO"), None);
    }

    #[test]
    fn test_classification() {
        assert!(Opcode::Btfss.is_skip());
        assert!(!Opcode::Bz.is_skip());
        assert!(Opcode::Dw.is_data());
        assert!(Opcode::Config.is_data());
        assert_eq!(Opcode::from_name("config"), Some(Opcode::Config));
        assert!(!Opcode::Nop.is_data());
    }
}
